mod bogus_flow;
mod flatten;
mod mba_substitution;
mod pipeline;

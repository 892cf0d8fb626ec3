pub mod markov_engine;
pub mod markov_parameters;

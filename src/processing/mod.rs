pub mod imputation_engine;

pub mod imputation_statistics;

pub mod explainable;

pub mod binary_utils;
pub mod env_adapter;

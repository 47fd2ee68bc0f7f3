pub mod abi;
mod strings;

pub(crate) mod common;
mod scanner;

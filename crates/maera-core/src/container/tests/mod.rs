#[cfg(test)]
mod common;

#[cfg(test)]
mod exports_tests;

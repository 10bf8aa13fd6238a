#[cfg(test)]
mod common;

#[cfg(test)]
mod descriptor_tests;
#[cfg(test)]
mod loader_tests;
#[cfg(test)]
mod manager_tests;

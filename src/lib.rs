pub mod config;
pub mod content;
pub mod semantic;
#[cfg(test)]
mod tests;

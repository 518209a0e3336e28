pub mod host_filter;
pub mod rest;

#[cfg(test)]
mod tests;

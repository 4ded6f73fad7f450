pub mod constraint;
pub mod params;
pub mod solver;
pub mod system;
pub mod types;

#[cfg(test)]
mod tests_constraints;

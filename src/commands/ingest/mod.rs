mod lifecycle;
mod pipeline;
mod run;
#[cfg(test)]
mod tests;

pub use run::run;

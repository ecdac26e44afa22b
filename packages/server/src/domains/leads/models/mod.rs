mod lead;

pub use lead::Lead;

pub mod panels;
pub mod params;
pub mod plot;
pub mod tree;

pub mod analytic_chemistry;
pub mod gray_opacity;

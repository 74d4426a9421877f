pub mod campaigns;
pub mod dunning;
pub mod health;
pub mod payments;

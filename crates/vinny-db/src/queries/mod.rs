pub mod cars;
pub mod locations;
pub mod pickups;
pub mod schedule;

/// Deals with all data produced by the AHRS (attitude and heading reference
/// system) board.
pub mod ahrs;

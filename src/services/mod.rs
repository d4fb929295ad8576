pub mod team_query;
pub mod team_service;

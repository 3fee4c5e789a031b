// src/repositories/mod.rs

pub mod memory;
pub mod postgres;

pub use jukebot_common::traits::SessionRepository;
pub use memory::InMemorySessionRepository;
pub use postgres::PostgresSessionRepository;

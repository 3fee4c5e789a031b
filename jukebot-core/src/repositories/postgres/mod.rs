pub mod session;

pub use session::PostgresSessionRepository;

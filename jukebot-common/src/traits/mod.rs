pub mod collaborator_traits;
pub mod repository_traits;

pub use collaborator_traits::{Recommender, Resolver, Transport};
pub use repository_traits::SessionRepository;

#[cfg(any(test, feature = "mocks"))]
pub use collaborator_traits::MockRecommender;

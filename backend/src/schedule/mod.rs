pub mod model;
pub mod repository;
pub mod repository_sqlx;
pub mod request;
pub mod service;

pub use model::{Schedule, ScheduleId, ServeEvent};
pub use repository::ScheduleRepository;
pub use repository_sqlx::SqlxScheduleRepository;
pub use service::ScheduleService;

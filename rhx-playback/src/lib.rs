//! Воспроизведение записей RHD/RHS вместо живого контроллера
//!
//! [`PlaybackReader`] выбирает менеджер раскладки, управляет навигацией и
//! темпом выдачи блоков, [`PlaybackTransport`] оборачивает его в интерфейс
//! контроллера.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pacing;
pub mod reader;
pub mod transport;

pub use config::*;
pub use error::*;
pub use events::*;
pub use metrics::*;
pub use pacing::*;
pub use reader::*;
pub use transport::*;

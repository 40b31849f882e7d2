//! Кодек воспроизведения записей RHD/RHS
//!
//! Разбирает заголовок записи, читает данные из любой из трёх раскладок на
//! диске (traditional, per-signal-type, per-channel) и восстанавливает из них
//! блоки данных в том же wire-формате, который выдаёт контроллер.
//!
//! # Быстрый старт
//!
//! ```no_run
//! use rhx_core::{open_format_manager, ManagerOptions, SampleFrame};
//!
//! let mut manager = open_format_manager("session.rhd", ManagerOptions::default())?;
//! let mut frame = SampleFrame::new(manager.descriptor());
//! let mut out = Vec::new();
//!
//! let written = manager.read_raw_blocks(1, &mut frame, &mut out)?;
//! println!("{written} bytes, first timestamp {}", manager.first_timestamp());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binary;
pub mod data_block;
pub mod format;
pub mod frame;
pub mod header;
pub mod report;
pub mod tail;
pub mod writer;

pub use binary::*;
pub use data_block::*;
pub use format::*;
pub use frame::*;
pub use header::*;
pub use report::*;
pub use tail::*;
pub use writer::*;

/// Версия библиотеки.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[allow(clippy::module_inception)]
mod config;

pub use config::{
    Config, LedgerConfig, NotifierChannel, NotifierConfig, RecipientsConfig, ScheduleConfig,
    SourceConfig, SourceKind, TicketSystemKind, TicketsConfig,
};

/// Tracking-ticket contract and implementations
pub mod devops;
pub mod memory;

pub use devops::DevOpsTicketSystem;
pub use memory::{InMemoryTicketSystem, Ticket};

use crate::error::TicketError;
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of work item to file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TicketKind {
    Bug,
    Task,
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketKind::Bug => f.write_str("Bug"),
            TicketKind::Task => f.write_str("Task"),
        }
    }
}

/// Trait for project-management systems that hold tracking tickets
///
/// Tickets are addressed by board (area path) and exact title. Every call may
/// fail with a transport error; callers decide how to degrade.
pub trait TicketSystem: Send + Sync {
    /// Whether a ticket with this exact title exists on the board
    fn ticket_exists<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<bool, TicketError>>;

    /// File a new ticket
    ///
    /// Returns the new ticket's id when the system reports one. An empty board
    /// is `TicketError::InvalidArgument`.
    fn create_ticket<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
        kind: TicketKind,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>>;

    /// Id of an existing ticket
    ///
    /// Systems that cannot look ids up return `TicketError::Unsupported`.
    fn ticket_id<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>>;

    /// Current description of a ticket, `None` if the ticket does not exist
    fn description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>>;

    /// Replace a ticket's description
    fn update_description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
    ) -> BoxFuture<'a, Result<(), TicketError>>;
}

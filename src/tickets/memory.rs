use crate::error::TicketError;
use crate::tickets::{TicketKind, TicketSystem};
use crate::BoxFuture;
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A ticket held by the in-memory board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub board: String,
    pub title: String,
    pub description: String,
    pub kind: TicketKind,
}

#[derive(Debug, Default)]
struct Boards {
    tickets: HashMap<(String, String), Ticket>,
    next_id: u64,
}

/// Ticket system kept entirely in memory
///
/// Ids are assigned sequentially starting at 1. Used for dry runs and as the
/// reference double for the ticket contract.
#[derive(Debug, Default)]
pub struct InMemoryTicketSystem {
    boards: Mutex<Boards>,
}

impl InMemoryTicketSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Boards>, TicketError> {
        self.boards
            .lock()
            .map_err(|_| TicketError::Transport("ticket store lock poisoned".to_string()))
    }

    fn key(board: &str, title: &str) -> (String, String) {
        (board.to_string(), title.to_string())
    }

    /// Snapshot of one ticket
    pub fn ticket(&self, board: &str, title: &str) -> Option<Ticket> {
        self.lock()
            .ok()
            .and_then(|boards| boards.tickets.get(&Self::key(board, title)).cloned())
    }

    /// Snapshot of every ticket, ordered by id
    pub fn tickets(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .lock()
            .map(|boards| boards.tickets.values().cloned().collect())
            .unwrap_or_default();
        tickets.sort_by_key(|ticket| ticket.id);
        tickets
    }

    /// Number of tickets across all boards
    pub fn len(&self) -> usize {
        self.lock().map(|boards| boards.tickets.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TicketSystem for InMemoryTicketSystem {
    fn ticket_exists<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<bool, TicketError>> {
        Box::pin(async move {
            let boards = self.lock()?;
            Ok(boards.tickets.contains_key(&Self::key(board, title)))
        })
    }

    fn create_ticket<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
        kind: TicketKind,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            if board.trim().is_empty() {
                return Err(TicketError::InvalidArgument(
                    "board must not be empty".to_string(),
                ));
            }

            let mut boards = self.lock()?;
            let key = Self::key(board, title);
            if boards.tickets.contains_key(&key) {
                debug!("Ticket '{}' already exists on board '{}'", title, board);
                return Ok(None);
            }

            boards.next_id += 1;
            let id = boards.next_id;
            boards.tickets.insert(
                key,
                Ticket {
                    id,
                    board: board.to_string(),
                    title: title.to_string(),
                    description: description.to_string(),
                    kind,
                },
            );
            Ok(Some(id.to_string()))
        })
    }

    fn ticket_id<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            let boards = self.lock()?;
            Ok(boards
                .tickets
                .get(&Self::key(board, title))
                .map(|ticket| ticket.id.to_string()))
        })
    }

    fn description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            let boards = self.lock()?;
            Ok(boards
                .tickets
                .get(&Self::key(board, title))
                .map(|ticket| ticket.description.clone()))
        })
    }

    fn update_description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
    ) -> BoxFuture<'a, Result<(), TicketError>> {
        Box::pin(async move {
            let mut boards = self.lock()?;
            match boards.tickets.get_mut(&Self::key(board, title)) {
                Some(ticket) => {
                    ticket.description = description.to_string();
                    Ok(())
                }
                None => Err(TicketError::NotFound(format!("{} on board {}", title, board))),
            }
        })
    }
}

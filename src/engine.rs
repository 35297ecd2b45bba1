//! Queue engine. The public operation surface for tickets.
//!
//! Every operation is a synchronous read-validate-mutate-persist cycle
//! against the store; persistence and notification happen inside the
//! store's write. An unknown ticket id, or a status that does not permit
//! the requested transition, is a benign no-op (`Ok(None)`) — double
//! clicks and racing tabs are normal here, never exceptional.

use chrono::Utc;

use crate::error::Result;
use crate::model::{
    MoveDirection, NewTicket, QueueState, Ticket, TicketId, TicketStatus, elapsed_seconds,
    make_code,
};
use crate::store::QueueStore;

/// What came back from ticket intake.
#[derive(Debug)]
pub struct AddOutcome {
    pub ticket: Ticket,
    /// Waiting tickets ahead of this one.
    pub ahead: usize,
}

/// The queue engine. Owns the store handle and enforces all invariants.
pub struct QueueEngine {
    store: QueueStore,
}

impl QueueEngine {
    pub fn new(store: QueueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Persist an initial snapshot for today if none exists yet.
    pub fn init_state(&self) -> Result<QueueState> {
        self.store.ensure_init()
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn state(&self) -> QueueState {
        self.store.read()
    }

    pub fn waiting_count(&self) -> usize {
        self.store.read().waiting().count()
    }

    pub fn serving_tickets(&self) -> Vec<Ticket> {
        self.store.read().serving().cloned().collect()
    }

    /// The serving ticket that was called first, if any. Kept for pages
    /// built against the single-current-ticket model.
    pub fn current_ticket(&self) -> Option<Ticket> {
        let st = self.store.read();
        let mut serving: Vec<&Ticket> = st.serving().collect();
        serving.sort_by_key(|t| t.called_at);
        serving.first().map(|t| (*t).clone())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Take a ticket. Issues the next display code and appends to the
    /// queue in waiting status.
    pub fn add_ticket(&self, new: NewTicket) -> Result<AddOutcome> {
        let mut st = self.store.read();
        let next = st.last_number + 1;
        let now = Utc::now();

        let ticket = Ticket {
            id: TicketId::generate(),
            code: make_code(next),
            name: new.name,
            phone: new.phone,
            service_type: new.service_type,
            description: new.description,
            status: TicketStatus::Waiting,
            created_at: now,
            called_at: None,
            started_at: None,
            served_at: None,
            canceled_at: None,
            paid_amount: None,
            payment_method: None,
            served_seconds: None,
            version: None,
        };

        st.queue.push(ticket.clone());
        st.last_number = next;
        self.store.write(&mut st, false)?;

        let ahead = st.waiting().filter(|t| t.id != ticket.id).count();
        Ok(AddOutcome { ticket, ahead })
    }

    /// Call a waiting ticket to a chair.
    pub fn attend_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut st = self.store.read();
        let now = Utc::now();
        let Some(t) = st.find_mut(id) else {
            return Ok(None);
        };
        if !t.status.can_transition_to(TicketStatus::Serving) {
            return Ok(None);
        }
        t.status = TicketStatus::Serving;
        t.called_at = Some(now);
        t.started_at = t.started_at.or(Some(now));
        let ticket = t.clone();
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Put a serving ticket back into the waiting pool. The call
    /// timestamps are cleared; a later attend stamps fresh ones.
    pub fn return_to_queue(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut st = self.store.read();
        let Some(t) = st.find_mut(id) else {
            return Ok(None);
        };
        if t.status != TicketStatus::Serving {
            return Ok(None);
        }
        t.status = TicketStatus::Waiting;
        t.called_at = None;
        t.started_at = None;
        let ticket = t.clone();
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Finish a serving ticket.
    pub fn mark_as_served(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut st = self.store.read();
        let Some(t) = st.find_mut(id) else {
            return Ok(None);
        };
        if !t.status.can_transition_to(TicketStatus::Served) {
            return Ok(None);
        }
        t.status = TicketStatus::Served;
        t.served_at = Some(Utc::now());
        let ticket = t.clone();
        st.served_count += 1;
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Cancel a ticket from any non-terminal status.
    pub fn cancel_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut st = self.store.read();
        let Some(t) = st.find_mut(id) else {
            return Ok(None);
        };
        if t.status.is_terminal() {
            return Ok(None);
        }
        t.status = TicketStatus::Canceled;
        t.canceled_at = Some(Utc::now());
        let ticket = t.clone();
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Swap a waiting ticket with its neighbor in the waiting-only view,
    /// mapped back to absolute queue positions. A boundary move is a
    /// no-op. Returns whether the order changed.
    pub fn move_turn(&self, id: &TicketId, direction: MoveDirection) -> Result<bool> {
        let mut st = self.store.read();
        let waiting_ids: Vec<TicketId> = st.waiting().map(|t| t.id.clone()).collect();
        let Some(pos) = waiting_ids.iter().position(|w| w == id) else {
            return Ok(false);
        };

        let neighbor = match direction {
            MoveDirection::Up if pos > 0 => &waiting_ids[pos - 1],
            MoveDirection::Down if pos + 1 < waiting_ids.len() => &waiting_ids[pos + 1],
            _ => return Ok(false),
        };

        let (Some(a), Some(b)) = (st.position(id), st.position(neighbor)) else {
            return Ok(false);
        };
        st.queue.swap(a, b);
        self.store.write(&mut st, false)?;
        Ok(true)
    }

    /// Record a payment on a ticket and finish it if it was still serving.
    ///
    /// The measured service duration runs from the service anchor to the
    /// serve instant. Revenue totals are updated in the same write.
    pub fn record_payment(
        &self,
        id: &TicketId,
        amount: f64,
        method: &str,
    ) -> Result<Option<Ticket>> {
        let mut st = self.store.read();
        let now = Utc::now();
        let Some(t) = st.find_mut(id) else {
            return Ok(None);
        };

        match t.status {
            TicketStatus::Serving => {
                t.status = TicketStatus::Served;
                t.served_at = Some(now);
            }
            // Payment landing after the serve is a normal late patch.
            TicketStatus::Served => {}
            _ => return Ok(None),
        }

        let served_at = t.served_at.unwrap_or(now);
        t.served_seconds = t.service_anchor().map(|a| elapsed_seconds(a, served_at));
        t.paid_amount = Some(amount);
        t.payment_method = Some(method.to_string());
        let ticket = t.clone();

        let service_type = ticket.service_type.clone();
        st.revenue.record(amount, method, &service_type);
        st.served_count = st
            .queue
            .iter()
            .filter(|t| t.status == TicketStatus::Served)
            .count() as u32;
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Replace today's state with a fresh default. Used by explicit
    /// day-close actions.
    pub fn reset_all(&self) -> Result<QueueState> {
        let mut st = QueueState::today(self.store.keyspace().tenant().as_str());
        self.store.write(&mut st, false)?;
        Ok(st)
    }

    // -----------------------------------------------------------------------
    // Legacy aliases
    //
    // Pages built against the single-current-ticket model call these.
    // They are thin adapters over the multi-serving operations above and
    // hold no state of their own. Prefer the modern names in new code.
    // -----------------------------------------------------------------------

    /// Deprecated: attend the first waiting ticket.
    pub fn next_ticket(&self) -> Result<Option<Ticket>> {
        let st = self.store.read();
        match st.waiting().next().map(|t| t.id.clone()) {
            Some(id) => self.attend_ticket(&id),
            None => Ok(None),
        }
    }

    /// Deprecated: cancel the earliest-called serving ticket.
    pub fn cancel_current(&self) -> Result<Option<Ticket>> {
        match self.current_ticket() {
            Some(t) => self.cancel_ticket(&t.id),
            None => Ok(None),
        }
    }

    /// Deprecated: re-stamp `called_at` on the current serving ticket,
    /// without changing its status. Used by call-out displays that key
    /// off the call instant.
    pub fn recall_current(&self) -> Result<Option<Ticket>> {
        let Some(current) = self.current_ticket() else {
            return Ok(None);
        };
        let mut st = self.store.read();
        let Some(t) = st.find_mut(&current.id) else {
            return Ok(None);
        };
        if t.status != TicketStatus::Serving {
            return Ok(None);
        }
        t.called_at = Some(Utc::now());
        let ticket = t.clone();
        self.store.write(&mut st, false)?;
        Ok(Some(ticket))
    }

    /// Deprecated: the attend step already stamps the start instant, so
    /// there is nothing left to start. Returns the current ticket.
    pub fn start_current(&self) -> Option<Ticket> {
        self.current_ticket()
    }

    /// Deprecated: finish the current serving ticket.
    pub fn attend_current(&self) -> Result<Option<Ticket>> {
        match self.current_ticket() {
            Some(t) => self.mark_as_served(&t.id),
            None => Ok(None),
        }
    }
}

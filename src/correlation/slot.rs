use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::Envelope;

/// Состояние ожидающего запроса. Переход из `Awaiting` возможен ровно
/// один раз: кто первым перевёл слот, тот и победил.
#[derive(Debug)]
enum SlotState {
    Awaiting,
    Resolved(Envelope),
    TimedOut,
    Cancelled,
    /// Ответ уже забран ожидающим.
    Taken,
}

/// Итог ожидания.
#[derive(Debug)]
pub(crate) enum SlotOutcome {
    Resolved(Envelope),
    TimedOut,
    Cancelled,
    /// Срок не вышел, ответа нет.
    Pending,
}

/// Ячейка для ответа.
///
/// Одна ячейка обслуживает и блокирующее, и асинхронное ожидание:
/// поток ждёт на `Condvar`, задача — на `Notify`.
#[derive(Debug)]
pub(crate) struct ReplySlot {
    state: Mutex<SlotState>,
    ready: Condvar,
    notify: Notify,
}

impl ReplySlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Awaiting),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Awaiting → Resolved. `false`, если слот уже в конечном состоянии.
    pub(crate) fn resolve(
        &self,
        envelope: Envelope,
    ) -> bool {
        self.transition(SlotState::Resolved(envelope))
    }

    /// Awaiting → TimedOut.
    pub(crate) fn expire(&self) -> bool {
        self.transition(SlotState::TimedOut)
    }

    /// Awaiting → Cancelled.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(SlotState::Cancelled)
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Awaiting)
    }

    fn transition(
        &self,
        next: SlotState,
    ) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Awaiting) {
            return false;
        }
        *state = next;
        drop(state);
        self.ready.notify_all();
        self.notify.notify_one();
        true
    }

    fn take(state: &mut SlotState) -> SlotOutcome {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Awaiting => {
                *state = SlotState::Awaiting;
                SlotOutcome::Pending
            }
            SlotState::Resolved(env) => SlotOutcome::Resolved(env),
            SlotState::TimedOut => {
                *state = SlotState::TimedOut;
                SlotOutcome::TimedOut
            }
            SlotState::Cancelled | SlotState::Taken => {
                *state = SlotState::Cancelled;
                SlotOutcome::Cancelled
            }
        }
    }

    pub(crate) fn try_take(&self) -> SlotOutcome {
        Self::take(&mut self.state.lock())
    }

    /// Блокирует поток до перехода слота или до `deadline`.
    pub(crate) fn wait_until(
        &self,
        deadline: Instant,
    ) -> SlotOutcome {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Awaiting) {
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::take(&mut state)
    }

    /// Асинхронный вариант [`wait_until`](Self::wait_until).
    pub(crate) async fn wait_until_async(
        &self,
        deadline: Instant,
    ) -> SlotOutcome {
        loop {
            match self.try_take() {
                SlotOutcome::Pending => {}
                outcome => return outcome,
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline.into(), notified)
                .await
                .is_err()
            {
                return self.try_take();
            }
        }
    }
}

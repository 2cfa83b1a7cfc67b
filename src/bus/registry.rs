use std::{cell::RefCell, collections::HashMap, sync::Arc};

use ahash::RandomState;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use super::Listener;

/// Содержимое записи тега: слушатели в порядке регистрации.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) listeners: Vec<Listener>,
    /// Запись удалена из реестра. Вставка в такую запись повторяется
    /// уже в свежей записи.
    pub(crate) retired: bool,
    /// Растёт при каждом удалении слушателя. Рассылка сверяет членство
    /// только после того, как счётчик сдвинулся.
    pub(crate) removals: u64,
}

impl SlotState {
    pub(crate) fn contains(
        &self,
        listener: &Listener,
    ) -> bool {
        self.listeners.iter().any(|l| l == listener)
    }

    fn retire(&mut self) {
        self.retired = true;
        self.removals += 1;
        self.listeners.clear();
    }
}

pub(crate) type SlotGuard<'a> = ReentrantMutexGuard<'a, RefCell<SlotState>>;

/// Запись тега: список слушателей под собственным замком.
///
/// Замок повторно входимый: слушатель может добавлять и удалять слушателей
/// своего тега прямо во время рассылки. `RefCell` никогда не заимствуется на
/// время вызова слушателя.
#[derive(Debug, Default)]
pub(crate) struct TagSlot {
    state: ReentrantMutex<RefCell<SlotState>>,
}

impl TagSlot {
    pub(crate) fn lock(&self) -> SlotGuard<'_> {
        self.state.lock()
    }
}

/// Реестр тегов.
///
/// Двухуровневая блокировка: глобальный `RwLock` охраняет только
/// существование записей и удерживается коротко, содержимое каждой записи
/// охраняет её собственный замок. Глобальный замок никогда не берётся под
/// замком записи, кроме удаления опустевшей записи, и никогда не держится
/// во время вызова слушателей.
#[derive(Debug, Default)]
pub(crate) struct TagRegistry {
    slots: RwLock<HashMap<Arc<str>, Arc<TagSlot>, RandomState>>,
}

impl TagRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(
        &self,
        tag: &str,
    ) -> Option<Arc<TagSlot>> {
        self.slots.read().get(tag).cloned()
    }

    fn get_or_create(
        &self,
        tag: &str,
    ) -> Arc<TagSlot> {
        if let Some(slot) = self.get(tag) {
            return slot;
        }
        self.slots
            .write()
            .entry(Arc::from(tag))
            .or_insert_with(|| Arc::new(TagSlot::default()))
            .clone()
    }

    /// Добавляет слушателя. Возвращает `false`, если он уже был в теге.
    pub(crate) fn insert(
        &self,
        tag: &str,
        listener: Listener,
    ) -> bool {
        loop {
            let slot = self.get_or_create(tag);
            let guard = slot.lock();
            let mut state = guard.borrow_mut();
            if state.retired {
                // запись удалили между поиском и захватом замка
                continue;
            }
            if state.contains(&listener) {
                return false;
            }
            state.listeners.push(listener);
            return true;
        }
    }

    /// Удаляет слушателя. Опустевшая запись удаляется из реестра.
    pub(crate) fn remove(
        &self,
        tag: &str,
        listener: &Listener,
    ) -> bool {
        let Some(slot) = self.get(tag) else {
            return false;
        };
        let guard = slot.lock();
        let mut state = guard.borrow_mut();
        let Some(pos) = state.listeners.iter().position(|l| l == listener) else {
            return false;
        };
        state.listeners.remove(pos);
        state.removals += 1;
        if state.listeners.is_empty() {
            state.retire();
            drop(state);
            let mut slots = self.slots.write();
            if slots.get(tag).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(tag);
            }
        }
        true
    }

    /// Удаляет запись тега целиком.
    pub(crate) fn clear(
        &self,
        tag: &str,
    ) -> bool {
        let removed = self.slots.write().remove(tag);
        match removed {
            Some(slot) => {
                slot.lock().borrow_mut().retire();
                true
            }
            None => false,
        }
    }

    /// Подменяет карту пустой под глобальным замком, затем гасит старые
    /// записи уже без него.
    pub(crate) fn clear_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.slots.write());
        let count = drained.len();
        for slot in drained.into_values() {
            slot.lock().borrow_mut().retire();
        }
        count
    }

    pub(crate) fn listener_count(
        &self,
        tag: &str,
    ) -> usize {
        let Some(slot) = self.get(tag) else {
            return 0;
        };
        let guard = slot.lock();
        let count = guard.borrow().listeners.len();
        count
    }

    pub(crate) fn tags(&self) -> Vec<String> {
        self.slots.read().keys().map(|k| k.to_string()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Listener {
        Listener::from_fn(|_| {})
    }

    /// Тест проверяет, что повторная вставка того же слушателя ничего не
    /// добавляет.
    #[test]
    fn test_insert_is_idempotent() {
        let reg = TagRegistry::new();
        let l = noop();

        assert!(reg.insert("a", l.clone()));
        assert!(!reg.insert("a", l.clone()));
        assert_eq!(reg.listener_count("a"), 1);
        assert_eq!(reg.len(), 1);
    }

    /// Тест проверяет, что удаление последнего слушателя удаляет запись
    /// тега.
    #[test]
    fn test_remove_last_prunes_slot() {
        let reg = TagRegistry::new();
        let a = noop();
        let b = noop();
        reg.insert("t", a.clone());
        reg.insert("t", b.clone());

        assert!(reg.remove("t", &a));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove("t", &b));
        assert_eq!(reg.len(), 0);
        assert!(reg.get("t").is_none());
        assert!(!reg.remove("t", &b));
    }

    /// Тест проверяет, что вставка в удалённую запись уходит в новую.
    #[test]
    fn test_insert_after_clear_uses_fresh_slot() {
        let reg = TagRegistry::new();
        reg.insert("t", noop());
        let old = reg.get("t").unwrap();

        assert!(reg.clear("t"));
        assert!(old.lock().borrow().retired);

        reg.insert("t", noop());
        let fresh = reg.get("t").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(reg.listener_count("t"), 1);
    }

    #[test]
    fn test_clear_all_retires_everything() {
        let reg = TagRegistry::new();
        for tag in ["a", "b", "c"] {
            reg.insert(tag, noop());
        }
        let b = reg.get("b").unwrap();

        assert_eq!(reg.clear_all(), 3);
        assert_eq!(reg.len(), 0);
        assert!(b.lock().borrow().listeners.is_empty());
        assert_eq!(reg.clear_all(), 0);
    }

    #[test]
    fn test_removals_are_counted() {
        let reg = TagRegistry::new();
        let (a, b) = (noop(), noop());
        reg.insert("t", a.clone());
        reg.insert("t", b.clone());
        let slot = reg.get("t").unwrap();
        assert_eq!(slot.lock().borrow().removals, 0);

        reg.insert("t", noop());
        assert_eq!(slot.lock().borrow().removals, 0);
        assert!(reg.remove("t", &a));
        assert!(!reg.remove("t", &a));
        assert_eq!(slot.lock().borrow().removals, 1);

        reg.clear("t");
        assert_eq!(slot.lock().borrow().removals, 2);
    }

    /// Тест проверяет, что замок записи повторно входимый.
    #[test]
    fn test_slot_lock_is_reentrant() {
        let reg = TagRegistry::new();
        let l = noop();
        reg.insert("t", l.clone());
        let slot = reg.get("t").unwrap();

        let _outer = slot.lock();
        // тот же поток под внешним замком
        assert!(!reg.insert("t", l.clone()));
        assert_eq!(reg.listener_count("t"), 1);
    }
}

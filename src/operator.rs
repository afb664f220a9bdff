//! The operator contract every DAG node implements, plus the machinery for cloning trait
//! objects into an [`crate::arena::Arena`] without requiring operator authors to hand-write
//! placement-new boilerplate.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::arena::{Arena, ArenaBox};

/// Which axis a windowed operator's eviction is measured along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDomain {
    /// Window size is a count of events (ticks).
    Event,
    /// Window size is a duration measured in tick units.
    Time,
}

/// An operator's windowing behavior, decided once at compile time from
/// [`Operator::is_cumulative`], [`Operator::is_dynamic`] and [`Operator::domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Never evicts; only the most recent output is retained.
    Cumulative,
    /// Fixed-size event-count window.
    Event,
    /// Event-count window whose size is re-read after every `on_data`.
    DynEvent,
    /// Fixed-duration time window.
    Time,
    /// Time window whose duration is re-read after every `on_data`.
    DynTime,
}

/// A stateful DAG node operating on values of type `T`.
///
/// `on_data` advances the operator's state from one input row; `value` reads the current
/// output without mutating state; `on_evict` rolls state backward when a row leaves the
/// retained window. Implementors are expected to be cheap to clone — cloning is how the
/// compiler replicates one authored operator across every group.
///
/// The `Send` supertrait lets a compiled DAG be handed to another thread (one group per
/// thread is the intended deployment); nothing about single-group execution requires it.
pub trait Operator<T>: Send + 'static {
    /// Feeds one input row (length [`Operator::num_inputs`]) into the operator's state.
    fn on_data(&mut self, inputs: &[T]);

    /// Writes [`Operator::num_outputs`] values to `out`, reflecting the operator's current
    /// state. Never mutates state.
    fn value(&self, out: &mut [T]);

    /// Rolls back the effect of a previously-`on_data`'d row that has left the retained
    /// window. The default no-op is correct for cumulative operators, which never evict.
    fn on_evict(&mut self, _inputs: &[T]) {}

    /// Restores the operator to its just-constructed state. Used by
    /// [`crate::exec::tumble_exec::TumbleExec`] between windows.
    fn reset(&mut self);

    /// Number of input columns `on_data`/`on_evict` expect.
    fn num_inputs(&self) -> usize;

    /// Number of output columns `value` writes.
    fn num_outputs(&self) -> usize;

    /// Whether this operator can be optimized to retain only its most recent output instead
    /// of every row within the window. Most running aggregates (sum-of-all-history, EMA) are
    /// cumulative; moving-window aggregates are not. Decided once at compile time.
    fn is_cumulative(&self) -> bool {
        true
    }

    /// Whether the window size changes at runtime. If true, [`Operator::window_size_event`]
    /// or [`Operator::window_size_time`] (per [`Operator::domain`]) is re-read after every
    /// `on_data` call; if false, it is read once at compile time.
    fn is_dynamic(&self) -> bool {
        false
    }

    /// Which axis windowing is measured along. Irrelevant when [`Operator::is_cumulative`].
    fn domain(&self) -> WindowDomain {
        WindowDomain::Event
    }

    /// Window size in events. Only consulted when `domain() == WindowDomain::Event`.
    fn window_size_event(&self) -> usize {
        0
    }

    /// Window size in tick units. Only consulted when `domain() == WindowDomain::Time`.
    fn window_size_time(&self) -> T
    where
        T: Default,
    {
        T::default()
    }

    /// Accepts an out-of-band parameter update. Most operators never receive one; the
    /// default is a no-op.
    fn on_param(&mut self, _params: &[T]) {}

    /// Number of columns `on_param` expects. Zero means the operator never receives updates.
    fn num_param(&self) -> usize {
        0
    }
}

/// Resolves an operator's static window descriptor once at compile time, matching the mode to
/// [`Operator::is_cumulative`]/[`Operator::is_dynamic`]/[`Operator::domain`].
pub fn resolve_window_mode<T, O: Operator<T> + ?Sized>(op: &O) -> WindowMode {
    if op.is_cumulative() {
        return WindowMode::Cumulative;
    }
    match (op.domain(), op.is_dynamic()) {
        (WindowDomain::Event, false) => WindowMode::Event,
        (WindowDomain::Event, true) => WindowMode::DynEvent,
        (WindowDomain::Time, false) => WindowMode::Time,
        (WindowDomain::Time, true) => WindowMode::DynTime,
    }
}

/// Bridges an owned operator value to in-place construction inside an [`Arena`], the way
/// `cloneable::clone_at` does for the original virtual-dispatch hierarchy. Implemented for
/// every `Operator<T> + Clone`; operator authors never implement this directly.
pub trait CloneIntoArena<T> {
    /// Clones `self` into freshly bump-allocated arena storage, returning an owning box.
    fn clone_into_arena(&self, arena: &mut Arena) -> ArenaBox<dyn Operator<T>>;

    /// Layout this operator's in-arena representation occupies.
    fn arena_layout(&self) -> Layout;
}

impl<T: 'static, O: Operator<T> + Clone> CloneIntoArena<T> for O {
    fn clone_into_arena(&self, arena: &mut Arena) -> ArenaBox<dyn Operator<T>> {
        let layout = Layout::new::<O>();
        let raw = arena.alloc(layout).cast::<O>();
        // SAFETY: `raw` points at `layout.size()` freshly bump-allocated, aligned, writable
        // bytes exclusively owned by this call; nothing has read or dropped them yet.
        unsafe { raw.as_ptr().write(self.clone()) };
        let erased: NonNull<dyn Operator<T>> = raw;
        // SAFETY: `erased` now points at a fully-initialized `O`, uniquely owned by the
        // `ArenaBox` we're about to return, and the arena it was carved from outlives it per
        // the compiled DAG's field order (see `ArenaBox` docs).
        unsafe { ArenaBox::from_raw(erased) }
    }

    fn arena_layout(&self) -> Layout {
        Layout::new::<O>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Adder {
        acc: f64,
    }

    impl Operator<f64> for Adder {
        fn on_data(&mut self, inputs: &[f64]) {
            self.acc += inputs.iter().sum::<f64>();
        }
        fn value(&self, out: &mut [f64]) {
            out[0] = self.acc;
        }
        fn reset(&mut self) {
            self.acc = 0.0;
        }
        fn num_inputs(&self) -> usize {
            2
        }
        fn num_outputs(&self) -> usize {
            1
        }
    }

    #[test]
    fn clone_into_arena_produces_independent_state() {
        let mut arena = Arena::with_capacity(1024);
        let template = Adder { acc: 0.0 };

        let mut a = template.clone_into_arena(&mut arena);
        let mut b = template.clone_into_arena(&mut arena);

        a.on_data(&[1.0, 2.0]);
        let mut out = [0.0];
        a.value(&mut out);
        assert_eq!(out[0], 3.0);

        b.value(&mut out);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn resolve_window_mode_matches_operator_descriptors() {
        struct Cumulative;
        impl Operator<f64> for Cumulative {
            fn on_data(&mut self, _: &[f64]) {}
            fn value(&self, _: &mut [f64]) {}
            fn reset(&mut self) {}
            fn num_inputs(&self) -> usize {
                0
            }
            fn num_outputs(&self) -> usize {
                0
            }
        }
        assert_eq!(resolve_window_mode(&Cumulative), WindowMode::Cumulative);

        struct FixedEvent;
        impl Operator<f64> for FixedEvent {
            fn on_data(&mut self, _: &[f64]) {}
            fn value(&self, _: &mut [f64]) {}
            fn reset(&mut self) {}
            fn num_inputs(&self) -> usize {
                0
            }
            fn num_outputs(&self) -> usize {
                0
            }
            fn is_cumulative(&self) -> bool {
                false
            }
            fn window_size_event(&self) -> usize {
                5
            }
        }
        assert_eq!(resolve_window_mode(&FixedEvent), WindowMode::Event);
    }
}

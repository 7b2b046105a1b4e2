//! User hooks ("triggers") at fixed points of an entity's life.
//!
//! A trigger returns `Ok(true)` to continue, `Ok(false)` to veto the step it
//! guards. A trigger that fails or panics is logged and treated as
//! `Ok(true)`, so one faulty hook never stops a run.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::entity::Entity;
use crate::fixed::SimTime;
use crate::rng::SimRng;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Message(String),
    #[error("missing state variable '{0}'")]
    MissingVariable(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Model-wide named numeric variables shared by all hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateVariables {
    values: BTreeMap<String, f64>,
}

impl StateVariables {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Like [`get`](Self::get), but a missing variable is a hook error.
    pub fn require(&self, name: &str) -> Result<f64, HookError> {
        self.get(name)
            .ok_or_else(|| HookError::MissingVariable(name.to_string()))
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Add `delta` (missing variables start at zero) and return the result.
    pub fn add(&mut self, name: &str, delta: f64) -> f64 {
        let v = self.values.entry(name.to_string()).or_insert(0.0);
        *v += delta;
        *v
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// What a trigger can see and change.
pub struct TriggerContext<'a> {
    pub now: SimTime,
    /// Name of the component running the hook.
    pub component: &'a str,
    /// `None` only for a source's `before_creation`.
    pub entity: Option<&'a mut Entity>,
    pub state: &'a mut StateVariables,
    pub rng: &'a mut SimRng,
    /// Sampled processing time, for `before_processing`/`after_processing`.
    pub processing_time: Option<f64>,
}

pub type Trigger = Box<dyn FnMut(&mut TriggerContext<'_>) -> Result<bool, HookError>>;

/// Run an optional trigger. No trigger means continue.
///
/// A panic inside the trigger is caught here. The trigger stays installed
/// and runs again at its next call.
pub fn run_trigger(trigger: Option<&mut Trigger>, ctx: &mut TriggerContext<'_>) -> bool {
    let Some(trigger) = trigger else {
        return true;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| trigger(ctx))) {
        Ok(Ok(proceed)) => proceed,
        Ok(Err(e)) => {
            error!(component = ctx.component, time = %ctx.now, error = %e, "hook failed, continuing");
            true
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(component = ctx.component, time = %ctx.now, panic = message, "hook panicked, continuing");
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Where a hook is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeArrival,
    AfterArrival,
    BeforeProcessing,
    AfterProcessing,
    BeforeCreation,
    AfterCreation,
    OnDestroy,
}

/// The hooks of one component.
#[derive(Default)]
pub struct Hooks {
    pub before_arrival: Option<Trigger>,
    pub after_arrival: Option<Trigger>,
    pub before_processing: Option<Trigger>,
    pub after_processing: Option<Trigger>,
    pub before_creation: Option<Trigger>,
    pub after_creation: Option<Trigger>,
    pub on_destroy: Option<Trigger>,
}

impl Hooks {
    pub fn slot_mut(&mut self, point: HookPoint) -> &mut Option<Trigger> {
        match point {
            HookPoint::BeforeArrival => &mut self.before_arrival,
            HookPoint::AfterArrival => &mut self.after_arrival,
            HookPoint::BeforeProcessing => &mut self.before_processing,
            HookPoint::AfterProcessing => &mut self.after_processing,
            HookPoint::BeforeCreation => &mut self.before_creation,
            HookPoint::AfterCreation => &mut self.after_creation,
            HookPoint::OnDestroy => &mut self.on_destroy,
        }
    }

    /// Take a hook out so it can run while the component is borrowed
    /// elsewhere. Put it back with [`restore`](Self::restore).
    pub fn take(&mut self, point: HookPoint) -> Option<Trigger> {
        self.slot_mut(point).take()
    }

    pub fn restore(&mut self, point: HookPoint, trigger: Option<Trigger>) {
        if trigger.is_some() {
            *self.slot_mut(point) = trigger;
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_arrival", &self.before_arrival.is_some())
            .field("after_arrival", &self.after_arrival.is_some())
            .field("before_processing", &self.before_processing.is_some())
            .field("after_processing", &self.after_processing.is_some())
            .field("before_creation", &self.before_creation.is_some())
            .field("after_creation", &self.after_creation.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

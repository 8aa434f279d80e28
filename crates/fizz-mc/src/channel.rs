//! Channels between roles and the messages queued on them.

use fizz_eval::{ChannelSpec, EvalError, EvalResult, RoleRef, Value};
use std::sync::Arc;

pub const UNORDERED: &str = "unordered";
pub const EXACTLY_ONCE: &str = "exactly_once";
pub const FIRE_AND_FORGET: &str = "fire_and_forget";

/// A call sent through a role stub, waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelMessage {
    pub channel: u32,
    pub receiver: RoleRef,
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// Builds a channel from `Channel(...)` arguments. Only unordered,
/// exactly-once, fire-and-forget channels are supported.
pub fn new_channel(id: u32, args: &[Value], kwargs: &[(String, Value)]) -> EvalResult<ChannelSpec> {
    if !args.is_empty() {
        return Err(EvalError::InvalidArgument(
            "Channel() takes keyword arguments only".into(),
        ));
    }
    let mut ordering = UNORDERED;
    let mut delivery = EXACTLY_ONCE;
    let mut blocking = FIRE_AND_FORGET;
    for (name, value) in kwargs {
        let text = value.as_str().ok_or_else(|| {
            EvalError::InvalidArgument(format!("Channel({}=...) must be a string", name))
        })?;
        let slot = match name.as_str() {
            "ordering" => &mut ordering,
            "delivery" => &mut delivery,
            "blocking" => &mut blocking,
            other => {
                return Err(EvalError::InvalidArgument(format!(
                    "unexpected Channel argument '{}'",
                    other
                )))
            }
        };
        *slot = match text {
            UNORDERED => UNORDERED,
            EXACTLY_ONCE => EXACTLY_ONCE,
            FIRE_AND_FORGET => FIRE_AND_FORGET,
            other => {
                return Err(EvalError::InvalidArgument(format!(
                    "unsupported channel {} '{}'",
                    name, other
                )))
            }
        };
    }
    if (ordering, delivery, blocking) != (UNORDERED, EXACTLY_ONCE, FIRE_AND_FORGET) {
        return Err(EvalError::InvalidArgument(format!(
            "unsupported channel: ordering={}, delivery={}, blocking={}",
            ordering, delivery, blocking
        )));
    }
    Ok(ChannelSpec {
        id,
        ordering: Arc::from(ordering),
        delivery: Arc::from(delivery),
        blocking: Arc::from(blocking),
    })
}

/// Channel attributes exposed to user code.
pub fn channel_attr(spec: &ChannelSpec, name: &str) -> Option<Value> {
    match name {
        "ordering" => Some(Value::Str(spec.ordering.clone())),
        "delivery" => Some(Value::Str(spec.delivery.clone())),
        "blocking" => Some(Value::Str(spec.blocking.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(name: &str, value: &str) -> (String, Value) {
        (name.to_string(), Value::str(value))
    }

    #[test]
    fn test_default_channel() {
        let spec = new_channel(3, &[], &[]).unwrap();
        assert_eq!(spec.id, 3);
        assert_eq!(&*spec.ordering, UNORDERED);
        assert_eq!(channel_attr(&spec, "delivery"), Some(Value::str(EXACTLY_ONCE)));
    }

    #[test]
    fn test_explicit_supported_combination() {
        let kwargs = [
            kw("ordering", "unordered"),
            kw("delivery", "exactly_once"),
            kw("blocking", "fire_and_forget"),
        ];
        assert!(new_channel(0, &[], &kwargs).is_ok());
    }

    #[test]
    fn test_rejects_other_combinations() {
        assert!(new_channel(0, &[], &[kw("ordering", "ordered")]).is_err());
        assert!(new_channel(0, &[], &[kw("speed", "fast")]).is_err());
        assert!(new_channel(0, &[Value::Int(1)], &[]).is_err());
    }
}

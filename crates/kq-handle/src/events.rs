//! Dispatched events in the same JSON shape as trigger columns.

use serde::Serialize;
use serde_json::{json, Value as Json};

use kq_engine::ChannelEvent;
use kq_ir::EventArg;

/// One entry of the event log: `(channel, name, argument)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FiredEvent {
    pub channel: usize,
    pub name: &'static str,
    pub arg: Json,
}

impl From<&ChannelEvent> for FiredEvent {
    fn from(ev: &ChannelEvent) -> Self {
        Self {
            channel: ev.channel,
            name: ev.event.kind.name(),
            arg: arg_to_json(&ev.event.arg),
        }
    }
}

fn arg_to_json(arg: &EventArg) -> Json {
    match arg {
        EventArg::None | EventArg::PassThrough => Json::Null,
        EventArg::Bool(b) => json!(b),
        EventArg::Int(i) => json!(i),
        EventArg::Float(f) => json!(f),
        EventArg::Timestamp(t) => json!([t.beats, t.rem]),
        EventArg::Name(n) => json!(n.as_str()),
        EventArg::Text(t) => json!(t.as_str()),
        EventArg::PatInst(p) => json!([p.pattern, p.instance]),
        EventArg::VarRef(n) => json!(format!("${}", n)),
    }
}

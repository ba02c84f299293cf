//! JSON-in, `Reply`-out entry points for the three protocol messages.
//!
//! | Message | Payload | Reply |
//! |---------|---------|-------|
//! | setup | `{session, name, target, declaration}` | `{status:"ok", controller}` |
//! | recompute | `{force_session?}` | none, outcome is logged |
//! | unsubscribe | `{session}` | `{status:"ok"}` |
//!
//! Failures never escape as errors: they become `{status:"failed", message}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Propagator, SetupRequest};
use crate::model::{Declaration, ObjectId};
use crate::notify::Notifier;
use crate::storage::StorageBackend;
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct SetupPayload {
    session: ObjectId,
    name: String,
    target: ObjectId,
    declaration: Declaration,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecomputePayload {
    #[serde(default)]
    force_session: Option<ObjectId>,
}

#[derive(Debug, Clone, Deserialize)]
struct UnsubscribePayload {
    session: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller: Option<ObjectId>,
    },
    Failed { message: String },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok { controller: None }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok { .. })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<T> From<Result<T>> for Reply
where
    T: Into<Option<ObjectId>>,
{
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Reply::Ok { controller: v.into() },
            Err(e) => Reply::Failed { message: e.to_string() },
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(message: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| Error::InvalidRequest(format!("{message}: {e}")))
}

impl<B: StorageBackend, N: Notifier> Propagator<B, N> {
    /// Setup message. The controller id is derived from the payload, so every
    /// session asking for the same view joins the same controller.
    pub async fn handle_setup(&self, raw: Value) -> Reply {
        let result = async {
            let p: SetupPayload = payload("setup", raw)?;
            let id = self.controller_id(&p.name, &p.declaration, &p.target);
            let request = SetupRequest {
                session: p.session,
                name: p.name,
                target: p.target,
                declaration: p.declaration,
            };
            self.setup(&id, request).await?;
            Ok::<_, Error>(Some(id))
        }
        .await;
        if let Err(e) = &result {
            warn!(error = %e, "setup failed");
        }
        Reply::from(result)
    }

    /// Recompute message. Nobody waits on it, so the outcome is only logged.
    pub async fn handle_recompute(&self, controller: &ObjectId, raw: Value) {
        let result = async {
            let p: RecomputePayload = match raw {
                Value::Null => RecomputePayload::default(),
                raw => payload("recompute", raw)?,
            };
            self.recompute(controller, p.force_session.as_ref()).await
        }
        .await;
        match result {
            Ok(outcome) => debug!(%controller, ?outcome, "recompute handled"),
            Err(e) => warn!(%controller, error = %e, "recompute failed"),
        }
    }

    pub async fn handle_unsubscribe(&self, controller: &ObjectId, raw: Value) -> Reply {
        let result = async {
            let p: UnsubscribePayload = payload("unsubscribe", raw)?;
            self.unsubscribe(controller, &p.session).await?;
            Ok::<_, Error>(None::<ObjectId>)
        }
        .await;
        if let Err(e) = &result {
            warn!(%controller, error = %e, "unsubscribe failed");
        }
        Reply::from(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_wire_shape() {
        assert_eq!(Reply::ok().to_json(), json!({"status": "ok"}));
        assert_eq!(
            Reply::Ok { controller: Some(ObjectId::new("c1")) }.to_json(),
            json!({"status": "ok", "controller": "c1"})
        );
        assert_eq!(
            Reply::Failed { message: "boom".into() }.to_json(),
            json!({"status": "failed", "message": "boom"})
        );
    }

    #[test]
    fn test_reply_from_result() {
        let failed: Reply = Result::<Option<ObjectId>>::Err(Error::NotFound("Controller c1".into())).into();
        assert!(!failed.is_ok());
        let ok: Reply = Result::<Option<ObjectId>>::Ok(None).into();
        assert_eq!(ok, Reply::ok());
    }

    #[test]
    fn test_payload_errors_are_invalid_requests() {
        let err = payload::<SetupPayload>("setup", json!({"session": "s1"})).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        let p: RecomputePayload = payload("recompute", json!({})).unwrap();
        assert!(p.force_session.is_none());
    }
}

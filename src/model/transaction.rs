use serde::Serialize;
use serde_json::Value;

/// A read-only view of one transaction from the TonAPI transaction history of the wallet.
///
/// TonAPI has changed its payload shape more than once, so this is built leniently from a JSON
/// value instead of with a strict `Deserialize` derive. Each field is taken from the first of
/// several known locations that holds a usable value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Transaction {
    /// `hash`, `transaction_id.hash` or `lt`. Unique and stable within one account.
    id: Option<String>,
    /// `utime`, `now` or 0. Only used to order a page newest-first.
    time: i64,
    /// Present when the transaction carries an incoming message, i.e. when funds came in.
    incoming: Option<IncomingMessage>,
}

/// The incoming message of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomingMessage {
    /// The value in nanotons. Zero when no positive value was found.
    nano: i128,
    /// The text comment the sender attached, if any.
    comment: Option<String>,
}

impl Transaction {
    /// Creates an incoming transaction. Mostly useful for tests and fakes.
    pub fn incoming(
        id: impl Into<String>,
        time: i64,
        nano: i128,
        comment: Option<&str>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            time,
            incoming: Some(IncomingMessage {
                nano,
                comment: comment.map(String::from),
            }),
        }
    }

    /// Creates a transaction without an incoming message.
    pub fn outgoing(id: impl Into<String>, time: i64) -> Self {
        Self {
            id: Some(id.into()),
            time,
            incoming: None,
        }
    }

    /// Builds a transaction from one element of the TonAPI `transactions` array. Returns `None` if
    /// `value` is not a JSON object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let tx = value.as_object()?;
        let in_msg = tx
            .get("in_msg")
            .and_then(Value::as_object)
            .filter(|m| !m.is_empty());

        let id = text(tx.get("hash"))
            .or_else(|| text(value.pointer("/transaction_id/hash")))
            .or_else(|| text(tx.get("lt")));

        let time = integer(tx.get("utime"))
            .filter(|t| *t != 0)
            .or_else(|| integer(tx.get("now")))
            .and_then(|t| i64::try_from(t).ok())
            .unwrap_or_default();

        let incoming = in_msg.map(|msg| {
            let nano = [msg.get("value"), msg.get("amount"), tx.get("value")]
                .into_iter()
                .filter_map(integer)
                .find(|n| *n > 0)
                .unwrap_or_default();
            let comment = text(value.pointer("/in_msg/decoded/comment"))
                .or_else(|| text(value.pointer("/in_msg/decoded_body/text")))
                .or_else(|| text(msg.get("message")))
                .or_else(|| text(tx.get("message")));
            IncomingMessage { nano, comment }
        });

        Some(Self { id, time, incoming })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn incoming_message(&self) -> Option<&IncomingMessage> {
        self.incoming.as_ref()
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming.is_some()
    }
}

impl IncomingMessage {
    pub fn nano(&self) -> i128 {
        self.nano
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// A non-empty string, or a number rendered as a string.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// An integer from a JSON number or a numeric string. Fractions are truncated.
fn integer(value: Option<&Value>) -> Option<i128> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i128)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i128>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i128))
        }
        _ => None,
    }
}

use std::fmt;
use std::hash::{Hash, Hasher};

use super::{FrameContext, Variable};
use crate::error::Result;

/// How a value's text is classified
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Integer,
    Text,
}

impl ReferenceType {
    /// `Integer` when the whole text parses as a signed integer, `Text` otherwise
    pub fn classify(text: &str) -> ReferenceType {
        match text.parse::<i64>() {
            Ok(_) => ReferenceType::Integer,
            Err(_) => ReferenceType::Text,
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReferenceType::Integer => write!(f, "integer"),
            ReferenceType::Text => write!(f, "text"),
        }
    }
}

/// The value of a variable or of an evaluated expression.
///
/// Two values are equal, and hash the same, exactly when their text is the same, wherever
/// they were fetched from.
#[derive(Clone, Debug)]
pub struct Value {
    text: String,
    owner: Option<(FrameContext, String)>,
}

impl Value {
    pub(crate) fn new(text: String, context: FrameContext, path: String) -> Self {
        Value {
            text,
            owner: Some((context, path)),
        }
    }

    /// A value that doesn't belong to any variable, it never has children
    pub fn detached(text: &str) -> Self {
        Value {
            text: text.to_string(),
            owner: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text[..]
    }

    pub fn reference_type(&self) -> ReferenceType {
        ReferenceType::classify(&self.text)
    }

    pub fn is_allocated(&self) -> bool {
        true
    }

    /// Path of the variable holding this value
    pub fn path(&self) -> Option<&str> {
        self.owner.as_ref().map(|(_, path)| &path[..])
    }

    /// Ask the VM for the children of the owning variable, whatever the value looks like
    pub async fn children(&self) -> Result<Vec<Variable>> {
        match &self.owner {
            Some((context, path)) => context.children(Some(&path[..])).await,
            None => Ok(vec![]),
        }
    }

    /// Whether `children` currently returns anything, costs the same round trip
    pub async fn has_children(&self) -> Result<bool> {
        Ok(!self.children().await?.is_empty())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.text == other.text
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;
    use std::hash::{Hash, Hasher};

    use super::*;
    use crate::events::Event;
    use crate::model::DebugTarget;
    use crate::test_utils::connect;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn check_classification() {
        assert_eq!(ReferenceType::classify("42"), ReferenceType::Integer);
        assert_eq!(ReferenceType::classify("-7"), ReferenceType::Integer);
        assert_eq!(ReferenceType::classify("abc"), ReferenceType::Text);
        assert_eq!(ReferenceType::classify(""), ReferenceType::Text);
        assert_eq!(ReferenceType::classify("3.14"), ReferenceType::Text);
        assert_eq!(format!("{}", ReferenceType::Integer), "integer");
    }

    #[test]
    fn check_detached_values() {
        let v = Value::detached("12");
        assert_eq!(v.reference_type(), ReferenceType::Integer);
        assert!(v.is_allocated());
        assert_eq!(v.path(), None);
    }

    #[tokio::test]
    async fn check_detached_value_has_no_children() {
        let v = Value::detached("hello");
        assert!(v.children().await.unwrap().is_empty());
        assert!(!v.has_children().await.unwrap());
    }

    #[tokio::test]
    async fn check_values_equal_by_text_only() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        assert_eq!(rx.recv().await.unwrap(), Event::Started { thread: 1 });

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|a|b")
        );
        let frame = frames.unwrap().remove(0);

        let (a, _) = tokio::join!(frame.variable("a"), vm.serve("var 1 0 a", "ok 5"));
        let (b, _) = tokio::join!(frame.variable("b"), vm.serve("var 1 0 b", "ok 5"));
        let (a, b) = (a.unwrap().value(), b.unwrap().value());

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a, Value::detached("5"));

        let set: HashSet<Value> = vec![a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn check_numeric_values_are_still_asked_for_children() {
        let (conn, mut vm) = connect();
        let (_, mut rx) = conn.subscribe();
        vm.emit("started 1").await;
        rx.recv().await.unwrap();

        let target = DebugTarget::new(conn, "prog.pda");
        let (threads, _) = tokio::join!(target.threads(), vm.serve("threads", "ok 1"));
        let thread = threads.unwrap().remove(0);
        let (frames, _) = tokio::join!(
            thread.stack_frames(),
            vm.serve("stack 1", "ok prog.pda|1|main|n")
        );
        let frame = frames.unwrap().remove(0);
        let (n, _) = tokio::join!(frame.variable("n"), vm.serve("var 1 0 n", "ok 3"));
        let value = n.unwrap().value();
        assert_eq!(value.reference_type(), ReferenceType::Integer);

        let (has, _) = tokio::join!(
            value.has_children(),
            vm.serve("children 1 0 n", "ok n.low|1")
        );
        assert!(has.unwrap());

        let (has, _) = tokio::join!(value.has_children(), vm.serve("children 1 0 n", "ok"));
        assert!(!has.unwrap());
    }
}

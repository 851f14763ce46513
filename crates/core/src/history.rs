use crate::llm::{Message, Role};

/// Ordered (question, answer) pairs rebuilt from a client-supplied conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatHistory {
    turns: Vec<(String, String)>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs each user message with the assistant message that follows it.
    /// System messages are skipped; a user message superseded by another user
    /// message before any answer is dropped.
    pub fn from_messages(msgs: &[Message]) -> Self {
        let mut turns = Vec::new();
        let mut pending: Option<&str> = None;
        for m in msgs {
            match m.role {
                Role::System => {}
                Role::User => pending = Some(&m.content),
                Role::Assistant => {
                    if let Some(q) = pending.take() {
                        turns.push((q.to_string(), m.content.clone()));
                    }
                }
            }
        }
        Self { turns }
    }

    pub fn push<Q: Into<String>, A: Into<String>>(&mut self, question: Q, answer: A) {
        self.turns.push((question.into(), answer.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[(String, String)] {
        &self.turns
    }

    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.turns.len() * 2);
        for (q, a) in &self.turns {
            out.push(Message::user(q.clone()));
            out.push(Message::assistant(a.clone()));
        }
        out
    }

    /// `Human:` / `Assistant:` transcript used by the condense prompt.
    pub fn transcript(&self) -> String {
        let mut s = String::new();
        for (q, a) in &self.turns {
            s.push_str("\nHuman: ");
            s.push_str(q);
            s.push_str("\nAssistant: ");
            s.push_str(a);
        }
        s
    }
}

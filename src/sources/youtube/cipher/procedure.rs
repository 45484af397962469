use std::fmt;

/// The operations a signature helper object can perform on the character
/// array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Reverse the whole sequence.
    Reverse,
    /// Swap index 0 with `argument % len`.
    Swap,
    /// Drop the first `argument` characters.
    Splice,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reverse => "reverse",
            Self::Swap => "swap",
            Self::Splice => "splice",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecipherStep {
    pub primitive: Primitive,
    pub argument: usize,
}

/// Ordered steps that turn a signature ciphertext into the value the media
/// host accepts. An empty procedure is the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DecipherProcedure {
    steps: Vec<DecipherStep>,
}

impl DecipherProcedure {
    pub fn new(steps: Vec<DecipherStep>) -> Self {
        Self { steps }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[DecipherStep] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, ciphertext: &str) -> String {
        let mut chars: Vec<char> = ciphertext.chars().collect();
        for step in &self.steps {
            match step.primitive {
                Primitive::Reverse => chars.reverse(),
                Primitive::Swap => {
                    if !chars.is_empty() {
                        let target = step.argument % chars.len();
                        chars.swap(0, target);
                    }
                }
                Primitive::Splice => {
                    let n = step.argument.min(chars.len());
                    chars.drain(..n);
                }
            }
        }
        chars.into_iter().collect()
    }
}

impl fmt::Display for DecipherProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("identity");
        }
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}({})", s.primitive, s.argument))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

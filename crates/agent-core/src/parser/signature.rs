use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Number,
    String,
    Boolean,
    StringArray,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParamType::Number => "a number",
            ParamType::String => "a quoted string",
            ParamType::Boolean => "a boolean",
            ParamType::StringArray => "an array of strings",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub optional: bool,
}

const fn required(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        optional: false,
    }
}

const fn optional(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        optional: true,
    }
}

/// Fixed parameter list for one action name. Optional parameters always
/// trail the required ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSignature {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
    /// Terminal actions end the task and are parsed leniently.
    pub terminal: bool,
}

impl ActionSignature {
    pub fn required(&self) -> usize {
        self.params.iter().filter(|param| !param.optional).count()
    }

    pub fn arity_label(&self) -> String {
        let required = self.required();
        let max = self.params.len();
        if required == max {
            required.to_string()
        } else {
            format!("{required}-{max}")
        }
    }
}

pub static SIGNATURES: &[ActionSignature] = &[
    ActionSignature {
        name: "click",
        params: &[required("elementId", ParamType::Number)],
        terminal: false,
    },
    ActionSignature {
        name: "setValue",
        params: &[
            required("elementId", ParamType::Number),
            required("value", ParamType::String),
        ],
        terminal: false,
    },
    ActionSignature {
        name: "navigate",
        params: &[required("url", ParamType::String)],
        terminal: false,
    },
    ActionSignature {
        name: "goBack",
        params: &[],
        terminal: false,
    },
    ActionSignature {
        name: "scroll",
        params: &[
            required("direction", ParamType::String),
            optional("amount", ParamType::Number),
        ],
        terminal: false,
    },
    ActionSignature {
        name: "wait",
        params: &[required("seconds", ParamType::Number)],
        terminal: false,
    },
    ActionSignature {
        name: "pressKey",
        params: &[required("key", ParamType::String)],
        terminal: false,
    },
    ActionSignature {
        name: "search",
        params: &[required("query", ParamType::String)],
        terminal: false,
    },
    ActionSignature {
        name: "check",
        params: &[
            required("elementId", ParamType::Number),
            optional("checked", ParamType::Boolean),
        ],
        terminal: false,
    },
    ActionSignature {
        name: "selectOptions",
        params: &[
            required("elementId", ParamType::Number),
            required("values", ParamType::StringArray),
        ],
        terminal: false,
    },
    ActionSignature {
        name: "createTab",
        params: &[optional("url", ParamType::String)],
        terminal: false,
    },
    ActionSignature {
        name: "switchTab",
        params: &[required("tabId", ParamType::Number)],
        terminal: false,
    },
    ActionSignature {
        name: "finish",
        params: &[],
        terminal: true,
    },
    ActionSignature {
        name: "fail",
        params: &[optional("reason", ParamType::String)],
        terminal: true,
    },
];

/// Resolves an action name, honouring the `done` alias for `finish`.
pub fn lookup(name: &str) -> Option<&'static ActionSignature> {
    let name = if name == "done" { "finish" } else { name };
    SIGNATURES.iter().find(|signature| signature.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_parameters_trail_required_ones() {
        for signature in SIGNATURES {
            let first_optional = signature.params.iter().position(|p| p.optional);
            if let Some(idx) = first_optional {
                assert!(
                    signature.params[idx..].iter().all(|p| p.optional),
                    "{} has a required parameter after an optional one",
                    signature.name
                );
            }
        }
    }

    #[test]
    fn arity_label_shows_range_for_optional_params() {
        assert_eq!(lookup("click").unwrap().arity_label(), "1");
        assert_eq!(lookup("scroll").unwrap().arity_label(), "1-2");
        assert_eq!(lookup("done").unwrap().name, "finish");
        assert!(lookup("hover").is_none());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Declarative package admission policies.

A policy is a YAML document evaluated against the JSON form of each
[Package]. Two flavors exist:

* `constraints` documents describe a shape the package must unify
  with, field by field.
* `rules` documents list `allow` and `deny` rules; a package passes
  when no deny rule fires and some allow rule does.

Documents with nothing in them are rejected at load time. A policy
with zero constraints admits everything, which is never what an
operator writing a policy meant.

```yaml
kind: constraints
constraints:
  Package: { pattern: "lib.*" }
  Essential: false
```

```yaml
kind: rules
allow:
  - Section: { pattern: "(contrib/)?games" }
deny:
  - Tag: { pattern: ".*::deprecated.*" }
```
*/

use {
    crate::{
        error::{DebianError, Result},
        package::Package,
    },
    regex::Regex,
    serde::Deserialize,
    serde_json::Value,
    std::{collections::BTreeMap, path::Path},
};

/// A predicate admitting or rejecting packages.
pub trait PackagePolicy: Send + Sync {
    fn admits(&self, package: &Package) -> Result<bool>;
}

/// One field constraint as written in a document.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    /// The field, rendered as a string, must match this anchored regex.
    Pattern { pattern: String },

    /// The field must (or must not) carry a non-default value.
    Present { present: bool },

    /// The field must equal this value exactly.
    Exact(Value),
}

/// A conjunction of field constraints.
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Rule {
    pub when: BTreeMap<String, Constraint>,
}

/// A policy file.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyDocument {
    Constraints {
        constraints: BTreeMap<String, Constraint>,
    },
    Rules {
        #[serde(default)]
        allow: Vec<Rule>,
        #[serde(default)]
        deny: Vec<Rule>,
    },
}

enum CompiledConstraint {
    Pattern(Regex),
    Present(bool),
    Exact(Value),
}

impl CompiledConstraint {
    fn compile(constraint: &Constraint) -> Result<Self> {
        Ok(match constraint {
            Constraint::Pattern { pattern } => {
                Self::Pattern(Regex::new(&format!("^(?:{})$", pattern))?)
            }
            Constraint::Present { present } => Self::Present(*present),
            Constraint::Exact(value) => Self::Exact(value.clone()),
        })
    }

    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Self::Pattern(regex) => match value {
                Some(Value::String(s)) => regex.is_match(s),
                Some(other) => regex.is_match(&other.to_string()),
                None => false,
            },
            Self::Present(wanted) => {
                let present = match value {
                    None | Some(Value::Null) => false,
                    Some(Value::String(s)) => !s.is_empty(),
                    Some(Value::Bool(b)) => *b,
                    Some(Value::Number(n)) => n.as_u64() != Some(0),
                    Some(Value::Array(a)) => !a.is_empty(),
                    Some(Value::Object(o)) => !o.is_empty(),
                };
                present == *wanted
            }
            Self::Exact(expected) => value == Some(expected),
        }
    }
}

struct CompiledRule {
    constraints: Vec<(String, CompiledConstraint)>,
}

impl CompiledRule {
    fn compile(fields: &BTreeMap<String, Constraint>) -> Result<Self> {
        let constraints = fields
            .iter()
            .map(|(field, constraint)| {
                Ok((field.clone(), CompiledConstraint::compile(constraint)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { constraints })
    }

    fn fires(&self, package: &Value) -> bool {
        self.constraints
            .iter()
            .all(|(field, constraint)| constraint.matches(package.get(field)))
    }
}

/// Compiled `constraints` document.
pub struct ConstraintPolicy {
    rule: CompiledRule,
}

impl PackagePolicy for ConstraintPolicy {
    fn admits(&self, package: &Package) -> Result<bool> {
        let value = serde_json::to_value(package)?;
        Ok(self.rule.fires(&value))
    }
}

/// Compiled `rules` document.
pub struct RulePolicy {
    allow: Vec<CompiledRule>,
    deny: Vec<CompiledRule>,
}

impl PackagePolicy for RulePolicy {
    fn admits(&self, package: &Package) -> Result<bool> {
        let value = serde_json::to_value(package)?;

        if self.deny.iter().any(|rule| rule.fires(&value)) {
            return Ok(false);
        }

        Ok(self.allow.iter().any(|rule| rule.fires(&value)))
    }
}

/// Admits every package. The stance of a repository with no policies.
pub struct AdmitAll;

impl PackagePolicy for AdmitAll {
    fn admits(&self, _package: &Package) -> Result<bool> {
        Ok(true)
    }
}

/// Disjunctive composition: admits when any member admits.
pub struct AnyOf {
    policies: Vec<Box<dyn PackagePolicy>>,
}

impl AnyOf {
    pub fn new(policies: Vec<Box<dyn PackagePolicy>>) -> Self {
        Self { policies }
    }
}

impl PackagePolicy for AnyOf {
    fn admits(&self, package: &Package) -> Result<bool> {
        for policy in &self.policies {
            if policy.admits(package)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Compile a parsed document, rejecting empty ones.
pub fn compile_document(name: &str, document: &PolicyDocument) -> Result<Box<dyn PackagePolicy>> {
    match document {
        PolicyDocument::Constraints { constraints } => {
            if constraints.is_empty() {
                return Err(DebianError::PolicyEmpty(name.to_string()));
            }

            Ok(Box::new(ConstraintPolicy {
                rule: CompiledRule::compile(constraints)?,
            }))
        }
        PolicyDocument::Rules { allow, deny } => {
            if allow.is_empty() && deny.is_empty() {
                return Err(DebianError::PolicyEmpty(name.to_string()));
            }

            Ok(Box::new(RulePolicy {
                allow: allow
                    .iter()
                    .map(|r| CompiledRule::compile(&r.when))
                    .collect::<Result<Vec<_>>>()?,
                deny: deny
                    .iter()
                    .map(|r| CompiledRule::compile(&r.when))
                    .collect::<Result<Vec<_>>>()?,
            }))
        }
    }
}

/// Parse and compile a policy document from YAML text.
pub fn compile_str(name: &str, yaml: &str) -> Result<Box<dyn PackagePolicy>> {
    let document: PolicyDocument = serde_yaml::from_str(yaml)?;
    compile_document(name, &document)
}

/// Load and compile a policy file.
pub fn load_policy_file(path: &Path) -> Result<Box<dyn PackagePolicy>> {
    let yaml = std::fs::read_to_string(path)?;
    compile_str(&path.display().to_string(), &yaml)
}

/// Apply a policy, keeping admitted packages in order.
pub fn filter_packages(
    policy: &dyn PackagePolicy,
    packages: Vec<Package>,
) -> Result<Vec<Package>> {
    let total = packages.len();

    let mut admitted = Vec::with_capacity(total);
    for package in packages {
        if policy.admits(&package)? {
            admitted.push(package);
        }
    }

    tracing::debug!(total, admitted = admitted.len(), "filtered packages");

    Ok(admitted)
}

//! Type dispatch: which post-extraction behaviors a type tag carries, and
//! which tag a pack request composes to.

use crate::archive::TypeTag;
use crate::error::{Result, SedaError};

/// A post-extraction behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Behavior {
    AwaitPassphrase,
    EmitMessage,
    RunCommands,
    Validate,
    DualRuntimeEntry,
}

/// Ordered behavior set of a tag
pub fn behaviors(tag: TypeTag) -> &'static [Behavior] {
    use Behavior::*;
    match tag {
        TypeTag::Core => &[],
        TypeTag::Construct => &[RunCommands],
        TypeTag::Vault => &[AwaitPassphrase],
        TypeTag::Web => &[DualRuntimeEntry],
        TypeTag::Commit => &[EmitMessage],
        TypeTag::SmartPatch => &[EmitMessage, RunCommands, Validate],
    }
}

pub fn has_behavior(tag: TypeTag, behavior: Behavior) -> bool {
    behaviors(tag).contains(&behavior)
}

/// States of the extraction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    AwaitPassphrase,
    Decode,
    WriteFiles,
    EmitMessage,
    RunCommands,
    Validate,
    Done,
}

/// The ordered stages an archive of this tag goes through
pub fn plan(tag: TypeTag) -> Vec<Stage> {
    let mut stages = vec![Stage::Start];
    if has_behavior(tag, Behavior::AwaitPassphrase) {
        stages.push(Stage::AwaitPassphrase);
    }
    stages.push(Stage::Decode);
    stages.push(Stage::WriteFiles);
    if has_behavior(tag, Behavior::EmitMessage) {
        stages.push(Stage::EmitMessage);
    }
    if has_behavior(tag, Behavior::RunCommands) {
        stages.push(Stage::RunCommands);
    }
    if has_behavior(tag, Behavior::Validate) {
        stages.push(Stage::Validate);
    }
    stages.push(Stage::Done);
    stages
}

/// What a pack invocation asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Request {
    pub message: bool,
    pub commands: bool,
    pub vault: bool,
    pub web: bool,
}

/// Resolve a request to its tag, rejecting undeclared combinations
pub fn compose(request: Request) -> Result<TypeTag> {
    let Request {
        message,
        commands,
        vault,
        web,
    } = request;

    match (message, commands, vault, web) {
        (false, false, false, false) => Ok(TypeTag::Core),
        (false, true, false, false) => Ok(TypeTag::Construct),
        (true, false, false, false) => Ok(TypeTag::Commit),
        (true, true, false, false) => Ok(TypeTag::SmartPatch),
        (false, false, true, false) => Ok(TypeTag::Vault),
        (false, false, false, true) => Ok(TypeTag::Web),
        _ => Err(SedaError::UnsupportedCombination(describe(request))),
    }
}

fn describe(request: Request) -> String {
    let parts: Vec<&str> = [
        (request.message, "message"),
        (request.commands, "commands"),
        (request.vault, "vault"),
        (request.web, "web"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    format!(
        "{} cannot be combined (vault and web archives take no message or commands)",
        parts.join(" + ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(tag: TypeTag) -> BTreeSet<Behavior> {
        behaviors(tag).iter().copied().collect()
    }

    #[test]
    fn test_smartpatch_is_construct_commit_validate() {
        let mut expected = set(TypeTag::Construct);
        expected.extend(set(TypeTag::Commit));
        expected.insert(Behavior::Validate);
        assert_eq!(set(TypeTag::SmartPatch), expected);
    }

    #[test]
    fn test_validate_only_in_smartpatch() {
        for tag in TypeTag::ALL {
            assert_eq!(has_behavior(tag, Behavior::Validate), tag == TypeTag::SmartPatch);
        }
    }

    #[test]
    fn test_compose_declared_combinations() {
        let req = |message, commands, vault, web| Request {
            message,
            commands,
            vault,
            web,
        };
        assert_eq!(compose(req(false, false, false, false)).unwrap(), TypeTag::Core);
        assert_eq!(compose(req(true, false, false, false)).unwrap(), TypeTag::Commit);
        assert_eq!(compose(req(false, true, false, false)).unwrap(), TypeTag::Construct);
        assert_eq!(compose(req(true, true, false, false)).unwrap(), TypeTag::SmartPatch);
        assert_eq!(compose(req(false, false, true, false)).unwrap(), TypeTag::Vault);
        assert_eq!(compose(req(false, false, false, true)).unwrap(), TypeTag::Web);
    }

    #[test]
    fn test_compose_rejects_undeclared_combinations() {
        let err = compose(Request {
            commands: true,
            vault: true,
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("commands + vault"));

        assert!(compose(Request {
            vault: true,
            web: true,
            ..Default::default()
        })
        .is_err());
        assert!(compose(Request {
            message: true,
            web: true,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_plan_orders_stages() {
        use Stage::*;
        assert_eq!(plan(TypeTag::Core), vec![Start, Decode, WriteFiles, Done]);
        assert_eq!(plan(TypeTag::Vault), vec![Start, AwaitPassphrase, Decode, WriteFiles, Done]);
        assert_eq!(
            plan(TypeTag::SmartPatch),
            vec![Start, Decode, WriteFiles, EmitMessage, RunCommands, Validate, Done]
        );
        for tag in TypeTag::ALL {
            let stages = plan(tag);
            assert!(stages.windows(2).all(|w| w[0] < w[1]), "{:?} out of order", tag);
        }
    }
}

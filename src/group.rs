//! Atomic bundles of commands.
//!
//! One user gesture usually produces several commands: deleting a class also
//! deletes its links, pasting creates many shapes at once. A [`CommandGroup`]
//! is the unit the [`History`](crate::history::History) undoes and redoes.
//!
//! Every walk over a group is all-or-nothing. If a command fails, the commands
//! already processed by that walk are reversed before the error is returned.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use thiserror::Error;

use crate::codec::{tokenize_line, CodecError, Record, Token};
use crate::command::{Command, CommandError, CommandKind};
use crate::history::HistoryId;
use crate::registry::IdentityRegistry;
use crate::scope::Scope;

/// Keyword opening a serialized group.
pub const GROUP_KEYWORD: &str = "GROUP";

/// Process-unique identifier of a [`CommandGroup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u64);

impl GroupId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        GroupId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("command group `{label}` failed")]
pub struct GroupError {
    pub label: String,
    /// Kind of the failing command, if the failure is tied to one.
    pub command: Option<CommandKind>,
    #[source]
    pub source: CommandError,
}

impl GroupError {
    fn new(label: &str, source: CommandError) -> Self {
        Self {
            label: label.to_string(),
            command: source.command(),
            source,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Walk {
    Apply,
    Undo,
    Redo,
}

/// An ordered, labelled list of commands undone and redone as one step.
#[derive(Debug)]
pub struct CommandGroup {
    id: GroupId,
    label: String,
    commands: Vec<Command>,
    owner: OnceLock<HistoryId>,
}

impl CommandGroup {
    /// Creates an empty group. `label` is what an editor shows in its Undo/Redo menu.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: GroupId::next(),
            label: label.into(),
            commands: Vec::new(),
            owner: OnceLock::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Appends `command` and records this group as its owner.
    pub fn add(&mut self, command: Command) {
        if !command.set_group(self.id) {
            log::warn!(
                "{} already belongs to {:?}, adding it to {} anyway",
                command,
                command.group(),
                self.id
            );
        }
        self.commands.push(command);
    }

    /// Builder-style [`add`](CommandGroup::add).
    pub fn with(mut self, command: Command) -> Self {
        self.add(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// The history this group was added to, if any.
    pub fn owner(&self) -> Option<HistoryId> {
        self.owner.get().copied()
    }

    pub(crate) fn set_owner(&self, history: HistoryId) -> bool {
        self.owner.set(history).is_ok()
    }

    /// Applies every command for the first time, in order.
    pub fn apply_all<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        self.walk(Walk::Apply, scope, registry)
    }

    /// Undoes every command, last one first.
    pub fn undo_all<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        self.walk(Walk::Undo, scope, registry)
    }

    /// Redoes every command, in order.
    pub fn redo_all<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        self.walk(Walk::Redo, scope, registry)
    }

    fn walk<S>(&self, walk: Walk, scope: &mut S, registry: &IdentityRegistry) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        let order: Vec<&Command> = match walk {
            Walk::Undo => self.commands.iter().rev().collect(),
            Walk::Apply | Walk::Redo => self.commands.iter().collect(),
        };

        // Steps that changed nothing are not reverted on failure.
        let mut changed: Vec<&Command> = Vec::with_capacity(order.len());
        for command in order {
            log::debug!("{:?} {}", walk, command);
            let result = match walk {
                Walk::Apply | Walk::Redo => command.forward(scope, registry),
                Walk::Undo => command.backward(scope, registry),
            };
            match result {
                Ok(true) => changed.push(command),
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "{} failed in group `{}`, reverting {} command(s): {}",
                        command,
                        self.label,
                        changed.len(),
                        e
                    );
                    self.compensate(walk, &changed, scope, registry);
                    scope.refresh();
                    return Err(GroupError::new(&self.label, e));
                }
            }
        }

        scope.refresh();
        Ok(())
    }

    /// Reverses the already processed prefix of a failed walk, most recent first.
    fn compensate<S>(&self, walk: Walk, done: &[&Command], scope: &mut S, registry: &IdentityRegistry)
    where
        S: Scope + ?Sized,
    {
        for command in done.iter().rev() {
            let result = match walk {
                Walk::Apply | Walk::Redo => command.backward(scope, registry),
                Walk::Undo => command.forward(scope, registry),
            };
            if let Err(e) = result {
                log::error!("cannot revert {} in group `{}`: {}", command, self.label, e);
            }
        }
    }

    /// The group as one log line.
    pub fn serialize(&self) -> String {
        let header = Record::new()
            .with("label", &self.label)
            .with("count", self.commands.len());
        let mut line = format!("{} {}", GROUP_KEYWORD, header.encode());
        for command in &self.commands {
            line.push(' ');
            line.push_str(&command.serialize());
        }
        line
    }

    /// Parses a group line without looking at any diagram.
    pub fn parse(line: &str) -> Result<Self, GroupError> {
        let malformed = |label: &str, command: Option<CommandKind>, source: CodecError| GroupError {
            label: label.to_string(),
            command,
            source: CommandError::MalformedRecord { command, source },
        };

        let mut tokens = tokenize_line(line)
            .map_err(|e| malformed("", None, e))?
            .into_iter()
            .peekable();
        match tokens.next() {
            Some(Token::Word(word)) if word == GROUP_KEYWORD => {}
            _ => {
                return Err(malformed(
                    "",
                    None,
                    CodecError::Malformed(format!("line does not start with {}", GROUP_KEYWORD)),
                ))
            }
        }

        let mut header = Record::new();
        while let Some(Token::Field(..)) = tokens.peek() {
            if let Some(Token::Field(name, value)) = tokens.next() {
                header.push(name, value);
            }
        }
        let label = header
            .require("label")
            .map_err(|e| malformed("", None, e))?
            .to_string();
        let count = header
            .parse_field::<usize>("count")
            .map_err(|e| malformed(&label, None, e))?;

        let mut group = CommandGroup::new(label.as_str());
        while let Some(token) = tokens.next() {
            let kind = match token {
                Token::Word(word) => word
                    .parse::<CommandKind>()
                    .map_err(|e| malformed(&label, None, e))?,
                Token::Field(name, _) => {
                    return Err(malformed(
                        &label,
                        None,
                        CodecError::Malformed(format!("field `{}` outside a command", name)),
                    ))
                }
            };
            let mut record = Record::new();
            while let Some(Token::Field(..)) = tokens.peek() {
                if let Some(Token::Field(name, value)) = tokens.next() {
                    record.push(name, value);
                }
            }
            let command = Command::from_record(kind, &record)
                .map_err(|e| malformed(&label, Some(kind), e))?;
            group.add(command);
        }

        if group.len() != count {
            return Err(malformed(
                &label,
                None,
                CodecError::Malformed(format!(
                    "`count={}` but {} command(s) follow",
                    count,
                    group.len()
                )),
            ));
        }
        Ok(group)
    }

    /// Parses a group line and checks that every command can run against `scope`.
    ///
    /// A command may refer to an element created by an earlier command of the
    /// same group.
    pub fn deserialize<S>(
        line: &str,
        scope: &S,
        registry: &IdentityRegistry,
    ) -> Result<Self, GroupError>
    where
        S: Scope + ?Sized,
    {
        let group = Self::parse(line)?;
        group.check_references(scope, registry)?;
        Ok(group)
    }

    pub(crate) fn check_references<S>(
        &self,
        scope: &S,
        registry: &IdentityRegistry,
    ) -> Result<(), GroupError>
    where
        S: Scope + ?Sized,
    {
        let mut earlier = HashMap::new();
        for command in &self.commands {
            command
                .check_references(scope, registry, &earlier)
                .map_err(|e| GroupError::new(&self.label, e))?;
            match command.kind() {
                CommandKind::Create => earlier.insert(command.element(), true),
                CommandKind::Delete => earlier.insert(command.element(), false),
                CommandKind::Modify => None,
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::{DeleteElement, ModifyProperty};
    use crate::diagram::MemoryDiagram;
    use crate::element::ElementKind;
    use crate::scope::ElementArgs;

    fn named(name: &str) -> ElementArgs {
        ElementArgs::new().value("name", name)
    }

    #[test]
    fn ids_are_unique() {
        let a = CommandGroup::new("a");
        let b = CommandGroup::new("b");

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn add_stamps_group_id() {
        let registry = IdentityRegistry::new();
        let group = CommandGroup::new("Add class")
            .with(Command::create(&registry, ElementKind::Class, named("A")));

        assert_eq!(1, group.len());
        assert_eq!(Some(group.id()), group.commands()[0].group());
    }

    #[test]
    fn apply_undo_redo_all() {
        let registry = IdentityRegistry::new();
        let mut diagram = MemoryDiagram::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        let a_ref = a.element();
        let group = CommandGroup::new("Add and rename")
            .with(a)
            .with(ModifyProperty::new(a_ref, "name", "A", "B").into());

        group.apply_all(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(a_ref, &diagram).unwrap();
        assert_eq!("B", diagram.property(&handle, "name").unwrap());

        group.undo_all(&mut diagram, &registry).unwrap();
        assert!(diagram.is_empty());

        group.redo_all(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(a_ref, &diagram).unwrap();
        assert_eq!("B", diagram.property(&handle, "name").unwrap());
        assert_eq!(3, diagram.refresh_count());
    }

    #[test]
    fn failing_command_leaves_scope_unchanged() {
        let registry = IdentityRegistry::new();
        let mut diagram = MemoryDiagram::new();
        let ghost = registry.mint(ElementKind::Note);
        let group = CommandGroup::new("Broken")
            .with(Command::create(&registry, ElementKind::Class, named("A")))
            .with(Command::create(&registry, ElementKind::Class, named("B")))
            .with(ModifyProperty::new(ghost, "text", "", "x").into());

        let err = group.apply_all(&mut diagram, &registry).unwrap_err();

        assert_eq!("Broken", err.label);
        assert_eq!(Some(CommandKind::Modify), err.command);
        assert_eq!(
            CommandError::ElementUnresolved {
                command: CommandKind::Modify,
                element: ghost
            },
            err.source
        );
        assert!(diagram.is_empty());
    }

    #[test]
    fn failing_undo_is_reverted() {
        let registry = IdentityRegistry::new();
        let mut diagram = MemoryDiagram::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        a.apply(&mut diagram, &registry).unwrap();
        let b = Command::create(&registry, ElementKind::Class, named("B"));
        let b_ref = b.element();
        let group = CommandGroup::new("Add B, rename A")
            .with(b)
            .with(ModifyProperty::new(a.element(), "name", "A", "Renamed").into());
        group.apply_all(&mut diagram, &registry).unwrap();

        // B disappears behind the group's back, so undoing its Create fails
        // after the rename has already been undone.
        let b_handle = registry.resolve(b_ref, &diagram).unwrap();
        diagram.delete_element(&b_handle).unwrap();
        let before = diagram.describe(&registry);

        let err = group.undo_all(&mut diagram, &registry).unwrap_err();

        assert_eq!(Some(CommandKind::Create), err.command);
        assert_eq!(before, diagram.describe(&registry));
    }

    #[test]
    fn failing_redo_keeps_elements_that_already_existed() {
        let registry = IdentityRegistry::new();
        let mut diagram = MemoryDiagram::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        a.apply(&mut diagram, &registry).unwrap();
        let ghost = registry.mint(ElementKind::Note);
        let line = CommandGroup::new("Replayed")
            .with(a)
            .with(ModifyProperty::new(ghost, "text", "", "x").into())
            .serialize();
        let group = CommandGroup::parse(&line).unwrap();
        let before = diagram.describe(&registry);

        let err = group.redo_all(&mut diagram, &registry).unwrap_err();

        assert_eq!(Some(CommandKind::Modify), err.command);
        assert_eq!(before, diagram.describe(&registry));
        assert_eq!(1, diagram.len());
    }

    #[test]
    fn serialize_layout() {
        let registry = IdentityRegistry::new();
        let element = registry.mint(ElementKind::Note);
        let group = CommandGroup::new("Edit <note>")
            .with(ModifyProperty::new(element, "text", "a", "b").into());

        assert_eq!(
            "GROUP <label=Edit \\<note\\>><count=1> MODIFY <element=note#1><property=text><old=a><new=b>",
            group.serialize()
        );
    }

    #[test]
    fn parse_round_trip() {
        let registry = IdentityRegistry::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        let b = Command::create(&registry, ElementKind::Class, named("B"));
        let link = Command::create(
            &registry,
            ElementKind::Link,
            ElementArgs::new()
                .value("name", "uses")
                .link("source", a.element())
                .link("destination", b.element()),
        );
        let group = CommandGroup::new("Paste").with(a).with(b).with(link);

        let parsed = CommandGroup::parse(&group.serialize()).unwrap();

        assert_eq!("Paste", parsed.label());
        assert_eq!(group.commands(), parsed.commands());
        assert_ne!(group.id(), parsed.id());
    }

    #[test]
    fn empty_group_round_trip() {
        let parsed = CommandGroup::parse(&CommandGroup::new("Nothing").serialize()).unwrap();

        assert!(parsed.is_empty());
    }

    #[test]
    fn parse_errors() {
        let count_mismatch = "GROUP <label=x><count=2> MODIFY <element=note#1><property=text><old=a><new=b>";
        assert!(matches!(
            CommandGroup::parse(count_mismatch),
            Err(GroupError {
                source: CommandError::MalformedRecord { .. },
                ..
            })
        ));

        let missing_field = "GROUP <label=x><count=1> MODIFY <element=note#1><property=text>";
        let err = CommandGroup::parse(missing_field).unwrap_err();
        assert_eq!("x", err.label);
        assert_eq!(Some(CommandKind::Modify), err.command);

        assert!(CommandGroup::parse("UNDO").is_err());
        assert!(CommandGroup::parse("GROUP <count=0>").is_err());
        assert!(CommandGroup::parse("GROUP <label=x><count=1> <stray=field>").is_err());
    }

    #[test]
    fn deserialize_allows_refs_created_earlier_in_the_group() {
        let registry = IdentityRegistry::new();
        let diagram = MemoryDiagram::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        let a_ref = a.element();
        let group = CommandGroup::new("Add and rename")
            .with(a)
            .with(ModifyProperty::new(a_ref, "name", "A", "B").into());

        assert!(CommandGroup::deserialize(&group.serialize(), &diagram, &registry).is_ok());

        let rename_only =
            CommandGroup::new("Rename").with(ModifyProperty::new(a_ref, "name", "A", "B").into());
        let err = CommandGroup::deserialize(&rename_only.serialize(), &diagram, &registry).unwrap_err();
        assert_eq!(
            CommandError::UnresolvedReference {
                command: CommandKind::Modify,
                element: a_ref
            },
            err.source
        );
    }

    #[test]
    fn deserialize_rejects_refs_deleted_earlier_in_the_group() {
        let registry = IdentityRegistry::new();
        let diagram = MemoryDiagram::new();
        let a = Command::create(&registry, ElementKind::Class, named("A"));
        let a_ref = a.element();
        let group = CommandGroup::new("Add, delete, rename")
            .with(a)
            .with(DeleteElement::new(a_ref, named("A")).into())
            .with(ModifyProperty::new(a_ref, "name", "A", "B").into());

        let err = CommandGroup::deserialize(&group.serialize(), &diagram, &registry).unwrap_err();

        assert_eq!(
            CommandError::UnresolvedReference {
                command: CommandKind::Modify,
                element: a_ref
            },
            err.source
        );
    }
}

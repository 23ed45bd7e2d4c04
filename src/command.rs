//! Undoable diagram edits.
//!
//! A [`Command`] is a small value object describing one edit. It never owns the
//! elements it edits: every operand is an [`ElementRef`] resolved through the
//! [`IdentityRegistry`] when the command runs.
//!
//! There are three kinds of command.
//!
//! | Kind                          | apply / redo               | undo                       |
//! | :---------------------------- | :------------------------- | :------------------------- |
//! | [Create](CreateElement)       | materialize the element    | remove the element         |
//! | [Delete](DeleteElement)       | remove the element         | materialize the snapshot   |
//! | [Modify](ModifyProperty)      | assign the new value       | assign the old value       |
//!
//! Create and Delete are an inverse pair and share the same two routines.
//! Materializing always rebinds the recreated instance to the *original* ref, so
//! commands recorded later keep resolving after any number of undo/redo cycles.
//!
//! # Atomicity
//! Every ref a command needs is resolved before the scope is touched.
//! If one cannot be resolved, [`CommandError::ElementUnresolved`] is returned and
//! the scope is left as it was.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use thiserror::Error;

use crate::codec::{tokenize_line, CodecError, Record, Token};
use crate::element::{ElementHandle, ElementKind, ElementRef};
use crate::group::GroupId;
use crate::registry::IdentityRegistry;
use crate::scope::{ElementArgs, ResolvedLink, Scope, ScopeError};

/// Tag of a [`Command`], as written in the durable log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Create,
    Delete,
    Modify,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Create => "CREATE",
            CommandKind::Delete => "DELETE",
            CommandKind::Modify => "MODIFY",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(CommandKind::Create),
            "DELETE" => Ok(CommandKind::Delete),
            "MODIFY" => Ok(CommandKind::Modify),
            other => Err(CodecError::Malformed(format!(
                "unknown command kind `{}`",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{command} {element}: element cannot be resolved")]
    ElementUnresolved {
        command: CommandKind,
        element: ElementRef,
    },
    #[error("{command}: referenced element {element} does not exist")]
    UnresolvedReference {
        command: CommandKind,
        element: ElementRef,
    },
    #[error("malformed command record")]
    MalformedRecord {
        command: Option<CommandKind>,
        #[source]
        source: CodecError,
    },
    #[error("{command} {element} rejected by the diagram")]
    Scope {
        command: CommandKind,
        element: ElementRef,
        #[source]
        source: ScopeError,
    },
}

impl CommandError {
    /// Kind of the command that failed, when known.
    pub fn command(&self) -> Option<CommandKind> {
        match self {
            CommandError::ElementUnresolved { command, .. }
            | CommandError::UnresolvedReference { command, .. }
            | CommandError::Scope { command, .. } => Some(*command),
            CommandError::MalformedRecord { command, .. } => *command,
        }
    }

    fn malformed(command: Option<CommandKind>, source: CodecError) -> Self {
        CommandError::MalformedRecord { command, source }
    }
}

/// Creation of a new element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateElement {
    element: ElementRef,
    args: ElementArgs,
}

impl CreateElement {
    pub fn new(element: ElementRef, args: ElementArgs) -> Self {
        Self { element, args }
    }

    pub fn element(&self) -> ElementRef {
        self.element
    }

    pub fn args(&self) -> &ElementArgs {
        &self.args
    }
}

/// Deletion of an element, with a snapshot to bring it back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteElement {
    element: ElementRef,
    snapshot: ElementArgs,
}

impl DeleteElement {
    pub fn new(element: ElementRef, snapshot: ElementArgs) -> Self {
        Self { element, snapshot }
    }

    pub fn element(&self) -> ElementRef {
        self.element
    }

    pub fn snapshot(&self) -> &ElementArgs {
        &self.snapshot
    }
}

/// Change of a single property, stored as an inverse pair of values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyProperty {
    element: ElementRef,
    property: String,
    old_value: String,
    new_value: String,
}

impl ModifyProperty {
    pub fn new(
        element: ElementRef,
        property: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            element,
            property: property.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    pub fn element(&self) -> ElementRef {
        self.element
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn old_value(&self) -> &str {
        &self.old_value
    }

    pub fn new_value(&self) -> &str {
        &self.new_value
    }

    fn assign<S>(
        &self,
        value: &str,
        scope: &mut S,
        registry: &IdentityRegistry,
    ) -> Result<bool, CommandError>
    where
        S: Scope + ?Sized,
    {
        let handle = resolve(CommandKind::Modify, self.element, scope, registry)?;
        scope
            .set_property(&handle, &self.property, value)
            .map_err(|source| CommandError::Scope {
                command: CommandKind::Modify,
                element: self.element,
                source,
            })?;
        Ok(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Create(CreateElement),
    Delete(DeleteElement),
    Modify(ModifyProperty),
}

/// One undoable edit.
///
/// A command is immutable once built. The only exception is the id of the
/// [`CommandGroup`](crate::group::CommandGroup) owning it, which is set exactly once when the
/// command is added to a group.
#[derive(Clone, Debug)]
pub struct Command {
    operation: Operation,
    group: OnceLock<GroupId>,
}

impl From<Operation> for Command {
    fn from(operation: Operation) -> Self {
        Self {
            operation,
            group: OnceLock::new(),
        }
    }
}

impl From<CreateElement> for Command {
    fn from(create: CreateElement) -> Self {
        Operation::Create(create).into()
    }
}

impl From<DeleteElement> for Command {
    fn from(delete: DeleteElement) -> Self {
        Operation::Delete(delete).into()
    }
}

impl From<ModifyProperty> for Command {
    fn from(modify: ModifyProperty) -> Self {
        Operation::Modify(modify).into()
    }
}

/// Commands are equal when they perform the same edit, whichever group owns them.
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation
    }
}

impl Eq for Command {}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Operation::Modify(m) => write!(f, "{} {}.{}", self.kind(), m.element, m.property),
            _ => write!(f, "{} {}", self.kind(), self.element()),
        }
    }
}

impl Command {
    /// A command creating a new element of `kind`.
    ///
    /// The element's ref is reserved right away, so later commands can name the
    /// element before it exists.
    pub fn create(registry: &IdentityRegistry, kind: ElementKind, args: ElementArgs) -> Self {
        CreateElement::new(registry.mint(kind), args).into()
    }

    /// A command deleting `element`, snapshotting what is needed to recreate it.
    pub fn delete<S>(
        scope: &S,
        registry: &IdentityRegistry,
        element: &ElementHandle,
    ) -> Result<Self, CommandError>
    where
        S: Scope + ?Sized,
    {
        let element_ref = registry.id_for(element);
        if !scope.contains(element) {
            return Err(CommandError::ElementUnresolved {
                command: CommandKind::Delete,
                element: element_ref,
            });
        }
        let snapshot = scope
            .snapshot(element, registry)
            .map_err(|source| CommandError::Scope {
                command: CommandKind::Delete,
                element: element_ref,
                source,
            })?;
        Ok(DeleteElement::new(element_ref, snapshot).into())
    }

    /// Commands deleting `element` together with everything depending on it.
    ///
    /// Dependents come first, so that undoing the commands in reverse order
    /// recreates `element` before anything that links to it.
    pub fn delete_cascade<S>(
        scope: &S,
        registry: &IdentityRegistry,
        element: &ElementHandle,
    ) -> Result<Vec<Self>, CommandError>
    where
        S: Scope + ?Sized,
    {
        fn visit<S: Scope + ?Sized>(
            scope: &S,
            registry: &IdentityRegistry,
            element: &ElementHandle,
            visited: &mut HashSet<ElementRef>,
            out: &mut Vec<Command>,
        ) -> Result<(), CommandError> {
            // Diagrams are cyclic; each element is deleted once.
            if !visited.insert(registry.id_for(element)) {
                return Ok(());
            }
            for dependent in scope.dependents(element) {
                visit(scope, registry, &dependent, visited, out)?;
            }
            out.push(Command::delete(scope, registry, element)?);
            Ok(())
        }

        let mut commands = Vec::new();
        visit(scope, registry, element, &mut HashSet::new(), &mut commands)?;
        Ok(commands)
    }

    /// A command setting `property` of `element` to `new_value`.
    ///
    /// The current value is read from the scope and kept for undo, so this must be
    /// called before the property is changed.
    pub fn modify<S>(
        scope: &S,
        registry: &IdentityRegistry,
        element: &ElementHandle,
        property: &str,
        new_value: impl Into<String>,
    ) -> Result<Self, CommandError>
    where
        S: Scope + ?Sized,
    {
        let element_ref = registry.id_for(element);
        let old_value = scope
            .property(element, property)
            .map_err(|source| CommandError::Scope {
                command: CommandKind::Modify,
                element: element_ref,
                source,
            })?;
        Ok(ModifyProperty::new(element_ref, property, old_value, new_value).into())
    }

    pub fn kind(&self) -> CommandKind {
        match self.operation {
            Operation::Create(_) => CommandKind::Create,
            Operation::Delete(_) => CommandKind::Delete,
            Operation::Modify(_) => CommandKind::Modify,
        }
    }

    /// The element this command edits.
    pub fn element(&self) -> ElementRef {
        match &self.operation {
            Operation::Create(c) => c.element,
            Operation::Delete(d) => d.element,
            Operation::Modify(m) => m.element,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Id of the group owning this command, once it has been added to one.
    pub fn group(&self) -> Option<GroupId> {
        self.group.get().copied()
    }

    /// Records the owning group. Returns `false` if a group was already set.
    pub(crate) fn set_group(&self, group: GroupId) -> bool {
        self.group.set(group).is_ok()
    }

    /// Performs the edit for the first time.
    pub fn apply<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), CommandError>
    where
        S: Scope + ?Sized,
    {
        log::debug!("apply {}", self);
        self.forward(scope, registry).map(|_| ())
    }

    /// Repeats the edit after an [`undo`](Command::undo).
    pub fn redo<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), CommandError>
    where
        S: Scope + ?Sized,
    {
        log::debug!("redo {}", self);
        self.forward(scope, registry).map(|_| ())
    }

    /// Reverses the last [`apply`](Command::apply) or [`redo`](Command::redo).
    pub fn undo<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<(), CommandError>
    where
        S: Scope + ?Sized,
    {
        log::debug!("undo {}", self);
        self.backward(scope, registry).map(|_| ())
    }

    /// Runs the edit forward. Returns `false` if the scope was already in the
    /// resulting state and nothing changed.
    pub(crate) fn forward<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<bool, CommandError>
    where
        S: Scope + ?Sized,
    {
        match &self.operation {
            Operation::Create(c) => {
                materialize(CommandKind::Create, c.element, &c.args, scope, registry)
            }
            Operation::Delete(d) => remove(CommandKind::Delete, d.element, scope, registry),
            Operation::Modify(m) => m.assign(&m.new_value, scope, registry),
        }
    }

    /// Runs the edit backward, with the same result as [`forward`](Command::forward).
    pub(crate) fn backward<S>(&self, scope: &mut S, registry: &IdentityRegistry) -> Result<bool, CommandError>
    where
        S: Scope + ?Sized,
    {
        match &self.operation {
            Operation::Create(c) => remove(CommandKind::Create, c.element, scope, registry),
            Operation::Delete(d) => materialize(
                CommandKind::Delete,
                d.element,
                &d.snapshot,
                scope,
                registry,
            ),
            Operation::Modify(m) => m.assign(&m.old_value, scope, registry),
        }
    }

    /// The command as one line of text: its kind followed by its fields.
    pub fn serialize(&self) -> String {
        let mut record = Record::new();
        record.push("element", self.element().to_string());
        match &self.operation {
            Operation::Create(c) => {
                record.push("kind", c.element.kind.to_string());
                c.args.write_to(&mut record);
            }
            Operation::Delete(d) => {
                record.push("kind", d.element.kind.to_string());
                d.snapshot.write_to(&mut record);
            }
            Operation::Modify(m) => {
                record.push("property", m.property.clone());
                record.push("old", m.old_value.clone());
                record.push("new", m.new_value.clone());
            }
        }
        format!("{} {}", self.kind(), record.encode())
    }

    /// Parses a serialized command without looking at any diagram.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut tokens = tokenize_line(text)
            .map_err(|e| CommandError::malformed(None, e))?
            .into_iter();
        let kind = match tokens.next() {
            Some(Token::Word(word)) => word
                .parse::<CommandKind>()
                .map_err(|e| CommandError::malformed(None, e))?,
            _ => {
                return Err(CommandError::malformed(
                    None,
                    CodecError::Malformed("record does not start with a command kind".to_string()),
                ))
            }
        };

        let mut record = Record::new();
        for token in tokens {
            match token {
                Token::Field(name, value) => record.push(name, value),
                Token::Word(word) => {
                    return Err(CommandError::malformed(
                        Some(kind),
                        CodecError::Malformed(format!("unexpected word `{}`", word)),
                    ))
                }
            }
        }
        Self::from_record(kind, &record).map_err(|e| CommandError::malformed(Some(kind), e))
    }

    /// Parses a serialized command and checks that everything it needs before
    /// running exists in `scope`.
    pub fn deserialize<S>(
        text: &str,
        scope: &S,
        registry: &IdentityRegistry,
    ) -> Result<Self, CommandError>
    where
        S: Scope + ?Sized,
    {
        let command = Self::parse(text)?;
        command.check_references(scope, registry, &HashMap::new())?;
        Ok(command)
    }

    pub(crate) fn from_record(kind: CommandKind, record: &Record) -> Result<Self, CodecError> {
        let element = record.parse_field::<ElementRef>("element")?;
        let command = match kind {
            CommandKind::Create | CommandKind::Delete => {
                let element_kind = record.parse_field::<ElementKind>("kind")?;
                if element_kind != element.kind {
                    return Err(CodecError::Malformed(format!(
                        "`kind={}` does not match element {}",
                        element_kind, element
                    )));
                }
                let args = ElementArgs::read_from(record)?;
                if kind == CommandKind::Create {
                    CreateElement::new(element, args).into()
                } else {
                    DeleteElement::new(element, args).into()
                }
            }
            CommandKind::Modify => ModifyProperty::new(
                element,
                record.require("property")?,
                record.require("old")?,
                record.require("new")?,
            )
            .into(),
        };
        Ok(command)
    }

    /// Checks the refs this command resolves when run forward.
    ///
    /// `earlier` holds the elements created (`true`) or deleted (`false`) by
    /// earlier commands of the same group. Their state when this command runs
    /// is taken from there instead of `scope`.
    pub(crate) fn check_references<S>(
        &self,
        scope: &S,
        registry: &IdentityRegistry,
        earlier: &HashMap<ElementRef, bool>,
    ) -> Result<(), CommandError>
    where
        S: Scope + ?Sized,
    {
        let required: Vec<ElementRef> = match &self.operation {
            Operation::Create(c) => c.args.links().map(|(_, element)| element).collect(),
            Operation::Delete(d) => vec![d.element],
            Operation::Modify(m) => vec![m.element],
        };
        for element in required {
            let exists = match earlier.get(&element) {
                Some(exists) => *exists,
                None => registry.resolve(element, scope).is_ok(),
            };
            if !exists {
                return Err(CommandError::UnresolvedReference {
                    command: self.kind(),
                    element,
                });
            }
        }
        Ok(())
    }
}

fn resolve<S>(
    command: CommandKind,
    element: ElementRef,
    scope: &S,
    registry: &IdentityRegistry,
) -> Result<ElementHandle, CommandError>
where
    S: Scope + ?Sized,
{
    registry
        .resolve(element, scope)
        .map_err(|_| CommandError::ElementUnresolved { command, element })
}

/// Brings `element` into existence from `args` under its original ref.
fn materialize<S>(
    command: CommandKind,
    element: ElementRef,
    args: &ElementArgs,
    scope: &mut S,
    registry: &IdentityRegistry,
) -> Result<bool, CommandError>
where
    S: Scope + ?Sized,
{
    if registry.resolve(element, scope).is_ok() {
        log::debug!("{} already exists, nothing to recreate", element);
        return Ok(false);
    }

    let links = args
        .links()
        .map(|(role, linked)| {
            resolve(command, linked, scope, registry).map(|handle| ResolvedLink {
                role: role.to_string(),
                element: handle,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scope_error = |source: ScopeError| CommandError::Scope {
        command,
        element,
        source,
    };
    let handle = scope
        .create_element(element.kind, args, &links)
        .map_err(scope_error)?;
    if let Err(e) = registry.assign(&handle, element) {
        if let Err(rollback) = scope.delete_element(&handle) {
            log::error!("failed to roll back creation of {}: {}", element, rollback);
        }
        return Err(scope_error(e.into()));
    }
    Ok(true)
}

/// Removes `element` from the scope.
fn remove<S>(
    command: CommandKind,
    element: ElementRef,
    scope: &mut S,
    registry: &IdentityRegistry,
) -> Result<bool, CommandError>
where
    S: Scope + ?Sized,
{
    let handle = resolve(command, element, scope, registry)?;
    scope
        .delete_element(&handle)
        .map_err(|source| CommandError::Scope {
            command,
            element,
            source,
        })?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagram::MemoryDiagram;

    fn class_args(name: &str) -> ElementArgs {
        ElementArgs::new()
            .value("name", name)
            .value("position", "10,20")
            .value("size", "100,60")
    }

    fn setup() -> (MemoryDiagram, IdentityRegistry) {
        (MemoryDiagram::new(), IdentityRegistry::new())
    }

    fn name_of(diagram: &MemoryDiagram, registry: &IdentityRegistry, element: ElementRef) -> String {
        let handle = registry.resolve(element, diagram).unwrap();
        diagram.property(&handle, "name").unwrap()
    }

    #[test]
    fn create_apply_undo_redo() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Class, class_args("Foo"));

        create.apply(&mut diagram, &registry).unwrap();
        assert_eq!(1, diagram.len());
        assert_eq!("Foo", name_of(&diagram, &registry, create.element()));

        create.undo(&mut diagram, &registry).unwrap();
        assert_eq!(0, diagram.len());
        assert!(registry.resolve(create.element(), &diagram).is_err());

        create.redo(&mut diagram, &registry).unwrap();
        assert_eq!(1, diagram.len());
        assert_eq!("Foo", name_of(&diagram, &registry, create.element()));
    }

    #[test]
    fn redo_of_existing_element_is_harmless() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Note, ElementArgs::new());

        create.apply(&mut diagram, &registry).unwrap();
        create.redo(&mut diagram, &registry).unwrap();

        assert_eq!(1, diagram.len());
    }

    #[test]
    fn delete_undo_restores_original_ref_and_state() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Class, class_args("Foo"));
        create.apply(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(create.element(), &diagram).unwrap();
        diagram.set_property(&handle, "stereotype", "entity").unwrap();
        let before = diagram.describe(&registry);

        let delete = Command::delete(&diagram, &registry, &handle).unwrap();
        delete.apply(&mut diagram, &registry).unwrap();
        assert!(diagram.is_empty());

        delete.undo(&mut diagram, &registry).unwrap();
        assert_eq!(before, diagram.describe(&registry));

        // The Create recorded earlier still finds the recreated element.
        create.undo(&mut diagram, &registry).unwrap();
        assert!(diagram.is_empty());
    }

    #[test]
    fn plain_delete_of_linked_element_is_refused() {
        let (mut diagram, registry) = setup();
        let a = Command::create(&registry, ElementKind::Class, class_args("A"));
        let b = Command::create(&registry, ElementKind::Class, class_args("B"));
        let link = Command::create(
            &registry,
            ElementKind::Link,
            ElementArgs::new()
                .link("source", a.element())
                .link("destination", b.element()),
        );
        for command in [&a, &b, &link] {
            command.apply(&mut diagram, &registry).unwrap();
        }
        let before = diagram.describe(&registry);
        let handle = registry.resolve(a.element(), &diagram).unwrap();

        let delete = Command::delete(&diagram, &registry, &handle).unwrap();
        let err = delete.apply(&mut diagram, &registry).unwrap_err();

        assert!(matches!(
            err,
            CommandError::Scope {
                command: CommandKind::Delete,
                source: ScopeError::Rejected(_),
                ..
            }
        ));
        assert_eq!(before, diagram.describe(&registry));
        assert_eq!(1, diagram.dependents(&handle).len());
    }

    #[test]
    fn delete_of_detached_element() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Class, class_args("Foo"));
        create.apply(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(create.element(), &diagram).unwrap();
        diagram.delete_element(&handle).unwrap();

        assert_eq!(
            Err(CommandError::ElementUnresolved {
                command: CommandKind::Delete,
                element: create.element()
            }),
            Command::delete(&diagram, &registry, &handle)
        );
    }

    #[test]
    fn modify_inverse_pair() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Class, class_args("Foo"));
        create.apply(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(create.element(), &diagram).unwrap();

        let modify = Command::modify(&diagram, &registry, &handle, "name", "Bar").unwrap();
        match modify.operation() {
            Operation::Modify(m) => {
                assert_eq!("Foo", m.old_value());
                assert_eq!("Bar", m.new_value());
            }
            other => panic!("unexpected {:?}", other),
        }

        modify.apply(&mut diagram, &registry).unwrap();
        assert_eq!("Bar", name_of(&diagram, &registry, create.element()));
        modify.undo(&mut diagram, &registry).unwrap();
        assert_eq!("Foo", name_of(&diagram, &registry, create.element()));
        modify.redo(&mut diagram, &registry).unwrap();
        assert_eq!("Bar", name_of(&diagram, &registry, create.element()));
    }

    #[test]
    fn modify_unknown_property() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Note, ElementArgs::new());
        create.apply(&mut diagram, &registry).unwrap();
        let handle = registry.resolve(create.element(), &diagram).unwrap();

        let result = Command::modify(&diagram, &registry, &handle, "abstract", "true");

        assert!(matches!(
            result,
            Err(CommandError::Scope {
                command: CommandKind::Modify,
                source: ScopeError::UnknownProperty { .. },
                ..
            })
        ));
    }

    #[test]
    fn unresolved_target_leaves_scope_untouched() {
        let (mut diagram, registry) = setup();
        let ghost = registry.mint(ElementKind::Class);
        let modify: Command = ModifyProperty::new(ghost, "name", "a", "b").into();

        assert_eq!(
            Err(CommandError::ElementUnresolved {
                command: CommandKind::Modify,
                element: ghost
            }),
            modify.apply(&mut diagram, &registry)
        );
        assert!(diagram.is_empty());
    }

    #[test]
    fn create_link_needs_its_ends() {
        let (mut diagram, registry) = setup();
        let source = Command::create(&registry, ElementKind::Class, class_args("A"));
        let destination = registry.mint(ElementKind::Class);
        source.apply(&mut diagram, &registry).unwrap();

        let link = Command::create(
            &registry,
            ElementKind::Link,
            ElementArgs::new()
                .value("name", "uses")
                .link("source", source.element())
                .link("destination", destination),
        );

        assert_eq!(
            Err(CommandError::ElementUnresolved {
                command: CommandKind::Create,
                element: destination
            }),
            link.apply(&mut diagram, &registry)
        );
        assert_eq!(1, diagram.len());
    }

    #[test]
    fn cascade_deletes_links_before_their_ends() {
        let (mut diagram, registry) = setup();
        let a = Command::create(&registry, ElementKind::Class, class_args("A"));
        let b = Command::create(&registry, ElementKind::Class, class_args("B"));
        a.apply(&mut diagram, &registry).unwrap();
        b.apply(&mut diagram, &registry).unwrap();
        let link = Command::create(
            &registry,
            ElementKind::Link,
            ElementArgs::new()
                .link("source", a.element())
                .link("destination", b.element()),
        );
        link.apply(&mut diagram, &registry).unwrap();
        let before = diagram.describe(&registry);

        let handle = registry.resolve(a.element(), &diagram).unwrap();
        let commands = Command::delete_cascade(&diagram, &registry, &handle).unwrap();
        let deleted: Vec<_> = commands.iter().map(Command::element).collect();
        assert_eq!(vec![link.element(), a.element()], deleted);

        for command in &commands {
            command.apply(&mut diagram, &registry).unwrap();
        }
        assert_eq!(1, diagram.len());

        for command in commands.iter().rev() {
            command.undo(&mut diagram, &registry).unwrap();
        }
        assert_eq!(before, diagram.describe(&registry));
    }

    #[test]
    fn serialize_field_order() {
        let element = ElementRef::new(ElementKind::Class, 3);
        let modify: Command = ModifyProperty::new(element, "name", "Foo", "Bar").into();

        assert_eq!(
            "MODIFY <element=class#3><property=name><old=Foo><new=Bar>",
            modify.serialize()
        );
    }

    #[test]
    fn parse_round_trip() {
        let registry = IdentityRegistry::new();
        let a = registry.mint(ElementKind::Class);
        let commands: Vec<Command> = vec![
            Command::create(&registry, ElementKind::Class, class_args("<<Foo>>")),
            DeleteElement::new(
                registry.mint(ElementKind::Link),
                ElementArgs::new().value("name", "a=b").link("source", a),
            )
            .into(),
            ModifyProperty::new(a, "text", "line 1\nline 2", "").into(),
        ];

        for command in commands {
            assert_eq!(command, Command::parse(&command.serialize()).unwrap());
        }
    }

    #[test]
    fn parse_ignores_unknown_trailing_fields() {
        let command =
            Command::parse("MODIFY <element=note#1><property=text><old=a><new=b><font=serif>")
                .unwrap();

        assert_eq!(CommandKind::Modify, command.kind());
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Command::parse("MODIFY <element=note#1><property=text><old=a>"),
            Err(CommandError::MalformedRecord {
                command: Some(CommandKind::Modify),
                source: CodecError::MissingField(_)
            })
        ));
        assert!(matches!(
            Command::parse("RENAME <element=note#1>"),
            Err(CommandError::MalformedRecord { command: None, .. })
        ));
        assert!(matches!(
            Command::parse("CREATE <element=note#1><kind=class>"),
            Err(CommandError::MalformedRecord { .. })
        ));
        assert!(matches!(
            Command::parse("<element=note#1>"),
            Err(CommandError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn deserialize_checks_references() {
        let (mut diagram, registry) = setup();
        let create = Command::create(&registry, ElementKind::Class, class_args("Foo"));
        let modify: Command = ModifyProperty::new(create.element(), "name", "Foo", "Bar").into();
        let text = modify.serialize();

        assert_eq!(
            Err(CommandError::UnresolvedReference {
                command: CommandKind::Modify,
                element: create.element()
            }),
            Command::deserialize(&text, &diagram, &registry)
        );

        create.apply(&mut diagram, &registry).unwrap();
        assert!(Command::deserialize(&text, &diagram, &registry).is_ok());

        // The element a Create brings into existence is not required up front.
        let recreate = Command::deserialize(&create.serialize(), &MemoryDiagram::new(), &registry);
        assert!(recreate.is_ok());
    }

    #[test]
    fn group_is_set_once() {
        let command = Command::create(&IdentityRegistry::new(), ElementKind::Text, ElementArgs::new());

        assert_eq!(None, command.group());
        assert!(command.set_group(GroupId(7)));
        assert!(!command.set_group(GroupId(8)));
        assert_eq!(Some(GroupId(7)), command.group());
    }
}

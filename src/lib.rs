//! A command-log undo-redo framework for diagram editors.
//!
//! Edits are recorded as small [Command](command::Command)s naming elements by
//! [ElementRef](element::ElementRef), bundled into [CommandGroup](group::CommandGroup)s,
//! and kept on a [History](history::History) timeline that is mirrored to an
//! append-only log.
//!
//! Example
//!
//! ```rust
//! use undolog::command::Command;
//! use undolog::diagram::MemoryDiagram;
//! use undolog::element::ElementKind;
//! use undolog::group::CommandGroup;
//! use undolog::history::HistoryBuilder;
//! use undolog::scope::{ElementArgs, Scope};
//!
//! fn main() {
//!     let mut diagram = MemoryDiagram::new();
//!     let mut history = HistoryBuilder::new().build().unwrap();
//!
//!     let create = Command::create(
//!         history.registry(),
//!         ElementKind::Class,
//!         ElementArgs::new().value("name", "Foo"),
//!     );
//!     let element = create.element();
//!     history
//!         .execute(CommandGroup::new("Add class").with(create), &mut diagram)
//!         .unwrap();
//!
//!     let handle = history.registry().resolve(element, &diagram).unwrap();
//!     let rename = Command::modify(&diagram, history.registry(), &handle, "name", "Bar").unwrap();
//!     history
//!         .execute(CommandGroup::new("Rename class").with(rename), &mut diagram)
//!         .unwrap();
//!     assert_eq!("Bar", diagram.property(&handle, "name").unwrap());
//!
//!     history.undo(&mut diagram).unwrap();
//!     assert_eq!("Foo", diagram.property(&handle, "name").unwrap());
//!
//!     history.undo(&mut diagram).unwrap();
//!     assert!(diagram.is_empty());
//!
//!     history.redo(&mut diagram).unwrap();
//!     let handle = history.registry().resolve(element, &diagram).unwrap();
//!     assert_eq!("Foo", diagram.property(&handle, "name").unwrap());
//! }
//! ```
pub mod codec;
pub mod command;
pub mod diagram;
pub mod element;
pub mod group;
pub mod history;
pub mod journal;
pub mod property;
pub mod registry;
pub mod scope;

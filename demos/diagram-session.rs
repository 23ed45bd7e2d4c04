/// Diagram session demo
/// This program edits a small class diagram, walks the history back and forth,
/// then rebuilds the diagram from the history log as a reopened document would.
///
use std::error::Error;
use std::path::Path;

use undolog::command::Command;
use undolog::diagram::MemoryDiagram;
use undolog::element::{ElementKind, ElementRef};
use undolog::group::CommandGroup;
use undolog::history::{History, HistoryBuilder, LogTarget};
use undolog::scope::ElementArgs;

fn print_diagram(title: &str, history: &History, diagram: &MemoryDiagram) {
    println!("## {} ##", title);
    for line in diagram.describe(history.registry()) {
        println!("  {}", line);
    }
    println!(
        "  (undoable: {}, redoable: {})",
        history.undoable_count(),
        history.redoable_count()
    );
}

fn add_class(
    history: &mut History,
    diagram: &mut MemoryDiagram,
    name: &str,
    x: i32,
) -> Result<ElementRef, Box<dyn Error>> {
    let create = Command::create(
        history.registry(),
        ElementKind::Class,
        ElementArgs::new()
            .value("name", name)
            .value("position", format!("{},0", x))
            .value("size", "120,80"),
    );
    let element = create.element();
    history.execute(CommandGroup::new(format!("Add {}", name)).with(create), diagram)?;
    Ok(element)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut diagram = MemoryDiagram::new();
    let mut history = HistoryBuilder::new()
        .capacity(50)
        .log(LogTarget::TempDir(std::env::temp_dir()))
        .build()?;

    println!("# EDIT #");
    let order = add_class(&mut history, &mut diagram, "Order", 0)?;
    let customer = add_class(&mut history, &mut diagram, "Customer", 200)?;
    let link = Command::create(
        history.registry(),
        ElementKind::Link,
        ElementArgs::new()
            .value("name", "placed by")
            .link("source", order)
            .link("destination", customer),
    );
    history.execute(CommandGroup::new("Add association").with(link), &mut diagram)?;

    let handle = history.registry().resolve(customer, &diagram)?;
    let rename = Command::modify(&diagram, history.registry(), &handle, "name", "Client")?;
    history.execute(CommandGroup::new("Rename Customer").with(rename), &mut diagram)?;
    print_diagram("after editing", &history, &diagram);

    println!("\n# DELETE WITH LINKS #");
    let mut delete = CommandGroup::new("Delete Client");
    for command in Command::delete_cascade(&diagram, history.registry(), &handle)? {
        delete.add(command);
    }
    history.execute(delete, &mut diagram)?;
    print_diagram("after delete", &history, &diagram);

    println!("\n# UNDO 2 TIMES #");
    history.undo_multi(2, &mut diagram)?;
    print_diagram("after undo", &history, &diagram);

    println!("\n# REDO 1 TIME #");
    history.redo(&mut diagram)?;
    print_diagram("after redo", &history, &diagram);

    println!("\n# REOPEN #");
    let shared = history.registry().clone();
    let log = history
        .log_path()
        .map(Path::to_path_buf)
        .ok_or("history log is not on disk")?;
    drop(history);

    let mut reopened = MemoryDiagram::new();
    let replay = HistoryBuilder::new()
        .capacity(50)
        .log(LogTarget::File(log.clone()))
        .discard_log_on_drop(true)
        .replay(&mut reopened)?;
    println!(
        "replayed {} group(s), complete: {}",
        replay.replayed,
        replay.is_complete()
    );
    print_diagram("reopened", &replay.history, &reopened);
    assert_eq!(diagram.describe(&shared), reopened.describe(replay.history.registry()));

    Ok(())
}

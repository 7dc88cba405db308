//! Greeter plugin - the smallest useful Pagewire plugin.
//!
//! `pagewire --plugin libpagewire_greet.so run greet world` prints
//! `hello, world`.

use pagewire::declare_plugin;

fn greet(names: Vec<String>) -> Result<Vec<String>, String> {
    if names.is_empty() {
        return Ok(vec!["hello, world".to_string()]);
    }
    Ok(names.iter().map(|name| format!("hello, {name}")).collect())
}

declare_plugin! {
    name: "Greeter",
    command: "greet",
    args: ["name?"],
    run: greet,
}

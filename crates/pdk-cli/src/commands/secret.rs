// `pdk secret {set|get|delete|list}`: manage the encrypted store.

use super::AppContext;
use crate::SecretCommands;
use std::io::Read;

pub fn execute(command: SecretCommands, app: AppContext) -> i32 {
    match command {
        SecretCommands::Set { name, value } => {
            let value = match value {
                Some(value) => value,
                None => {
                    // Piped or prompted input; trailing newline dropped.
                    let mut buffer = String::new();
                    eprintln!("Enter value for '{name}':");
                    if std::io::stdin().read_to_string(&mut buffer).is_err() {
                        eprintln!("could not read the secret value from stdin");
                        return 1;
                    }
                    buffer.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            match app.store.set(&name, &value) {
                Ok(()) => {
                    println!("secret '{name}' stored");
                    0
                }
                Err(e) => super::run::fail(&e),
            }
        }
        SecretCommands::Get { name } => match app.store.get(&name) {
            Ok(Some(value)) => {
                // Deliberate disclosure; bypasses the masked log sinks.
                println!("{value}");
                0
            }
            Ok(None) => {
                eprintln!("secret '{name}' is not set");
                1
            }
            Err(e) => super::run::fail(&e),
        },
        SecretCommands::Delete { name } => match app.store.delete(&name) {
            Ok(true) => {
                println!("secret '{name}' deleted");
                0
            }
            Ok(false) => {
                eprintln!("secret '{name}' is not set");
                1
            }
            Err(e) => super::run::fail(&e),
        },
        SecretCommands::List => match app.store.list() {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
                0
            }
            Err(e) => super::run::fail(&e),
        },
    }
}

use std::{env, path::Path, process};

fn main() {
  env_logger::init();

  let arguments = env::args().collect::<Vec<String>>();

  let [_, source, destination, logs] = arguments.as_slice() else {
    eprintln!(
      "Usage: {} <source> <destination> <logs>",
      arguments.first().map(String::as_str).unwrap_or("compile")
    );
    process::exit(1);
  };

  match warden::compile(Path::new(source), Path::new(destination), Path::new(logs)) {
    Ok(statistics) => print!("{statistics}"),
    Err(error) => {
      eprintln!("error: {error}");
      process::exit(1);
    }
  }
}

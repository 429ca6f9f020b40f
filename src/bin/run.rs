use std::{env, path::Path, process};

fn main() {
  env_logger::init();

  let arguments = env::args().collect::<Vec<String>>();

  let [_, executable, input, output, errors] = arguments.as_slice() else {
    eprintln!(
      "Usage: {} <executable> <input_file> <output_file> <errors_file>",
      arguments.first().map(String::as_str).unwrap_or("run")
    );
    process::exit(1);
  };

  match warden::run(
    Path::new(executable),
    Path::new(input),
    Path::new(output),
    Path::new(errors),
  ) {
    Ok(statistics) => print!("{statistics}"),
    Err(error) => {
      eprintln!("error: {error}");
      process::exit(1);
    }
  }
}

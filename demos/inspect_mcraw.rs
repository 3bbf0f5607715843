use mcraw_parse::{DecodeConfig, Decoder, MetadataDocument};

fn print_document(label: &str, doc: &MetadataDocument) {
    println!("{label}:");
    println!("{}", serde_json::to_string_pretty(&doc.to_json()).unwrap());
}

fn main() {
    env_logger::init();

    let mut lenient = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--lenient" => lenient = true,
            _ => path = Some(arg),
        }
    }
    let path = path.expect("usage: inspect_mcraw [--lenient] <mcraw-path>");

    let config = DecodeConfig::default().lenient(lenient);
    let decoder = Decoder::open_with_config(&path, &config).unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(1);
    });

    println!("Version: {}", decoder.version());
    println!("Frames: {}", decoder.frame_count());
    if let (Some(first), Some(last)) = (decoder.frame_timestamps().first(), decoder.frame_timestamps().last()) {
        println!("Timestamps: {first} .. {last}");
    }

    print_document("Container metadata", decoder.container_metadata());

    match decoder.first_frame_metadata() {
        Some(Ok(doc)) => print_document("First frame", &doc),
        Some(Err(err)) => println!("First frame: {err}"),
        None => println!("No frames"),
    }
    if decoder.frame_count() > 1 {
        match decoder.last_frame_metadata() {
            Some(Ok(doc)) => print_document("Last frame", &doc),
            Some(Err(err)) => println!("Last frame: {err}"),
            None => {},
        }
    }

    let failed = decoder.frame_metadata().filter(|(_, metadata)| metadata.is_err()).count();
    if failed > 0 {
        println!("{failed} frame(s) failed to decode");
    }
}

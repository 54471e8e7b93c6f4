error_chain!{
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Regex(::regex::Error);
    }

    errors {
        InvalidConfiguration(msg: String) {
            description("invalid configuration")
            display("Invalid validation configuration: {:}", msg)
        }
        ArtifactError(msg: String) {
            description("artifact error")
            display("Could not read uploaded artifact: {:}", msg)
        }
        ScannerError(msg: String) {
            description("scanner error")
            display("Malware scanner failed: {:}", msg)
        }
        ValidatorTimeout(name: String, millis: u64) {
            description("validator timeout")
            display("Validator '{:}' did not finish within {:} ms", name, millis)
        }
        ValidatorPanicked(name: String, msg: String) {
            description("validator panicked")
            display("Validator '{:}' panicked: {:}", name, msg)
        }
        Cancelled(name: String) {
            description("validation cancelled")
            display("Validation was cancelled while running validator '{:}'", name)
        }
    }
}

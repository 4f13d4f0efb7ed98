use clap::ValueEnum;

/// How the result envelope is rendered on stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Summary or value on stdout, errors and diagnostics on stderr
	#[default]
	Text,
	/// Pretty-printed JSON envelope
	Json,
	/// Single-line JSON envelope
	Ndjson,
	/// TOON encoding of the envelope
	Toon,
}

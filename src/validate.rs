//! Metadata validation: XML Schema first, then the BAG schematron profile.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, warn};

use crate::error::{BagError, Result};
use crate::xml::Document;

/// Environment variable pointing at the folder holding the schema trees.
pub const RESOURCES_ENV: &str = "BAG_RESOURCES_DIR";

const DEFAULT_RESOURCES_DIR: &str = "resources";

/// Locates the `iso19139` and `iso19757-3` schema folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    root: PathBuf,
}

impl Resources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `BAG_RESOURCES_DIR` when set, otherwise `./resources`.
    pub fn locate() -> Self {
        match env::var_os(RESOURCES_ENV) {
            Some(dir) => Self::new(dir),
            None => Self::new(DEFAULT_RESOURCES_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(BagError::io(
                &dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("unable to find the {name} folder")),
            ));
        }
        Ok(dir)
    }

    pub fn schema_path(&self) -> Result<PathBuf> {
        Ok(self.folder("iso19139")?.join("bag").join("bag.xsd"))
    }

    pub fn schematron_path(&self) -> Result<PathBuf> {
        Ok(self.folder("iso19757-3")?.join("bag_metadata_profile.sch"))
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::locate()
    }
}

/// External XML validation engine.
pub trait XmlValidator {
    /// Validate against an XML Schema. Returns the verdict and violations.
    fn validate_schema(&self, doc: &[u8], xsd: &Path) -> Result<(bool, Vec<String>)>;

    /// Validate against an ISO schematron. Returns the verdict and the
    /// text of every failed assertion.
    fn validate_schematron(&self, doc: &[u8], sch: &Path) -> Result<(bool, Vec<String>)>;
}

/// Runs libxml2's `xmllint`, feeding the document through stdin.
#[derive(Debug, Clone)]
pub struct XmllintValidator {
    program: PathBuf,
}

impl XmllintValidator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, mode: &str, rules: &Path, doc: &[u8]) -> Result<(bool, Vec<String>)> {
        let mut child = Command::new(&self.program)
            .arg("--noout")
            .arg(mode)
            .arg(rules)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BagError::Validation(format!("failed to run {}: {e}", self.program.display()))
            })?;

        // stdin is fed on its own thread so a chatty stderr cannot stall it
        let stdin = child.stdin.take();
        let (fed, output) = thread::scope(|scope| {
            let feeder = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(doc),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (feeder.join(), output)
        });
        let output =
            output.map_err(|e| BagError::Validation(format!("xmllint did not complete: {e}")))?;
        match fed {
            Ok(Ok(())) => {}
            // xmllint may stop reading early; its exit status tells why
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => {
                return Err(BagError::Validation(format!("failed to feed xmllint: {e}")))
            }
            Err(_) => return Err(BagError::Validation("xmllint feeder panicked".into())),
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let messages: Vec<String> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !is_status_line(l))
            .map(str::to_string)
            .collect();

        match output.status.code() {
            Some(0) => Ok((true, Vec::new())),
            // 3 and 4 are validation failures; anything else is a tool error
            Some(3) | Some(4) => Ok((false, messages)),
            _ => Err(BagError::Validation(format!(
                "xmllint {mode} {} failed: {}",
                rules.display(),
                stderr.trim()
            ))),
        }
    }
}

impl Default for XmllintValidator {
    fn default() -> Self {
        Self::new("xmllint")
    }
}

fn is_status_line(line: &str) -> bool {
    line.ends_with(" validates") || line.ends_with(" fails to validate")
}

/// Text of a schematron report line `<path> line <n>: <assertion text>`.
fn failed_assert_text(line: &str) -> &str {
    line.find(" line ")
        .and_then(|at| line[at..].find(": ").map(|sep| at + sep + 2))
        .map_or(line, |start| line[start..].trim())
}

impl XmlValidator for XmllintValidator {
    fn validate_schema(&self, doc: &[u8], xsd: &Path) -> Result<(bool, Vec<String>)> {
        self.run("--schema", xsd, doc)
    }

    fn validate_schematron(&self, doc: &[u8], sch: &Path) -> Result<(bool, Vec<String>)> {
        let (valid, lines) = self.run("--schematron", sch, doc)?;
        let asserts = lines
            .iter()
            .map(|l| failed_assert_text(l).to_string())
            .collect();
        Ok((valid, asserts))
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Validation {
    pub valid: bool,
    pub diagnostics: Vec<String>,
}

impl Validation {
    /// Human-readable report naming the validated source.
    pub fn report(&self, source: &str) -> String {
        let mut msg = format!("XML input source: {source}\nValidation output: ");
        if self.valid {
            msg.push_str("VALID");
        } else {
            msg.push_str("INVALID\nReasons:\n");
            for reason in &self.diagnostics {
                msg.push_str(&format!(" - {reason}\n"));
            }
        }
        msg
    }
}

/// Parse, then XSD, then schematron. Schema violations do not stop the
/// schematron pass.
pub struct MetadataValidator {
    engine: Box<dyn XmlValidator>,
    resources: Resources,
}

impl MetadataValidator {
    pub fn new(engine: Box<dyn XmlValidator>, resources: Resources) -> Self {
        Self { engine, resources }
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn validate(&self, xml: &[u8]) -> Result<Validation> {
        let mut result = Validation {
            valid: true,
            diagnostics: Vec::new(),
        };

        if let Err(e) = Document::parse(xml) {
            warn!("unable to parse XML metadata: {e}");
            result.valid = false;
            result.diagnostics.push(e.to_string());
            return Ok(result);
        }

        let xsd = self.resources.schema_path()?;
        let (schema_ok, violations) = self.engine.validate_schema(xml, &xsd)?;
        if schema_ok {
            debug!("xsd validated");
        } else {
            warn!("invalid metadata based on XML schema");
            result.valid = false;
            result.diagnostics.extend(violations);
        }

        let sch = self.resources.schematron_path()?;
        let (schematron_ok, asserts) = self.engine.validate_schematron(xml, &sch)?;
        if schematron_ok {
            debug!("schematron validated");
        } else {
            warn!("invalid metadata based on Schematron");
            for text in &asserts {
                warn!("{text}");
            }
            result.valid = false;
            result.diagnostics.extend(asserts);
        }

        Ok(result)
    }
}

impl Default for MetadataValidator {
    fn default() -> Self {
        Self::new(Box::new(XmllintValidator::default()), Resources::locate())
    }
}

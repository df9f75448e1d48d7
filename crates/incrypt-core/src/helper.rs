//! The remote-helper protocol adapter.
//!
//! git spawns `git-remote-incrypt <remote> <url>` and speaks a line
//! protocol on its stdio. `list` runs the decryption walk and republishes
//! managed tips as cleartext shadow references; `push` runs the encryption
//! walk, rewrites the metadata record, and hands the result to the
//! transport in one explicit-refspec push. Everything here is synchronous;
//! one command batch completes before the next is read.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use git2::{ObjectType, Oid, Repository};

use crate::crypto::keywrap::KeyTool;
use crate::error::{IncryptError, Result};
use crate::meta::{MetaData, META_REF};
use crate::mirror::Mirror;
use crate::refname;
use crate::walk::decrypt::Decryptor;
use crate::walk::encrypt::Encryptor;

/// Options negotiated through the `option` command.
pub struct Options {
    pub atomic: bool,
    pub progress: bool,
    pub verbosity: u32,
    pub followtags: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            // All refs of a push move together unless git says otherwise.
            atomic: true,
            progress: true,
            verbosity: 1,
            followtags: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PushSpec {
    pub force: bool,
    pub src: Option<String>,
    pub dst: String,
}

/// Parse the argument of a `push` command: `[+]<src>:<dst>`, empty src
/// meaning a deletion.
pub(crate) fn parse_push_spec(spec: &str) -> Option<PushSpec> {
    let (force, spec) = match spec.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let (src, dst) = spec.split_once(':')?;
    if dst.is_empty() {
        return None;
    }
    Some(PushSpec {
        force,
        src: (!src.is_empty()).then(|| src.to_string()),
        dst: dst.to_string(),
    })
}

/// Shadow reference for a cleartext ref under this remote's namespace.
pub(crate) fn shadow_ref(url_hash: &str, clear: &str) -> String {
    let tail = clear.strip_prefix("refs/").unwrap_or(clear);
    format!("refs/incrypt/{url_hash}/{tail}")
}

pub struct Helper {
    cr: Repository,
    mirror: Mirror,
    keytool: KeyTool,
    options: Options,
}

impl Helper {
    pub fn new(cr: Repository, url: &str) -> Result<Self> {
        let mirror = Mirror::open(&cr, url)?;
        Ok(Self {
            cr,
            mirror,
            keytool: KeyTool::from_env(),
            options: Options::default(),
        })
    }

    /// Drive the protocol until EOF or a terminating blank line.
    pub fn run(&mut self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        let mut lines = input.lines();
        while let Some(line) = lines.next().transpose()? {
            tracing::debug!(command = %line, "helper command");
            if line.is_empty() {
                break;
            }
            if line == "capabilities" {
                writeln!(output, "fetch")?;
                writeln!(output, "push")?;
                writeln!(output, "option")?;
                writeln!(output)?;
            } else if line == "list" || line == "list for-push" {
                self.cmd_list(&mut output)?;
            } else if let Some(rest) = line.strip_prefix("option ") {
                let response = self.set_option(rest);
                writeln!(output, "{response}")?;
            } else if line.starts_with("fetch ") {
                // Objects were written during list; drain the batch.
                for next in lines.by_ref() {
                    if next?.is_empty() {
                        break;
                    }
                }
                writeln!(output)?;
            } else if let Some(first) = line.strip_prefix("push ") {
                let mut specs = vec![first.to_string()];
                for next in lines.by_ref() {
                    let next = next?;
                    match next.strip_prefix("push ") {
                        Some(spec) => specs.push(spec.to_string()),
                        None if next.is_empty() => break,
                        None => {
                            return Err(IncryptError::Transport(format!(
                                "unexpected line in push batch: {next}"
                            )))
                        }
                    }
                }
                self.cmd_push(&specs, &mut output)?;
            } else {
                return Err(IncryptError::Transport(format!(
                    "unknown helper command: {line}"
                )));
            }
            output.flush()?;
        }
        Ok(())
    }

    fn set_option(&mut self, rest: &str) -> &'static str {
        let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
        match name {
            "atomic" => self.options.atomic = value == "true",
            "progress" => self.options.progress = value == "true",
            "followtags" => self.options.followtags = value == "true",
            "verbosity" => self.options.verbosity = value.parse().unwrap_or(1),
            _ => return "unsupported",
        }
        "ok"
    }

    /// `list`: fetch the mirror, decrypt anything new, refresh the shadow
    /// references, and report cleartext tips.
    fn cmd_list(&mut self, output: &mut impl Write) -> Result<()> {
        self.mirror.fetch()?;
        let er = self.mirror.repo();
        let meta = MetaData::read(er, &self.keytool)?;
        let map = meta.read_map(er)?;

        let mut decryptor = Decryptor::new(&self.cr, er, &meta.key, &map)?;
        let refs = decryptor.fetch_refs()?;

        // Objects are all in the CR now; publish the tips as shadow refs
        // and drop shadows for refs that no longer exist on the remote.
        let mut desired: HashSet<String> = HashSet::new();
        for (clear, tip) in &refs {
            let shadow = shadow_ref(self.mirror.url_hash(), clear);
            self.cr.reference(&shadow, *tip, true, "incrypt: list")?;
            desired.insert(shadow);
        }
        let glob = format!("refs/incrypt/{}/*", self.mirror.url_hash());
        let stale: Vec<String> = self
            .cr
            .references_glob(&glob)?
            .filter_map(|r| r.ok().and_then(|r| r.name().map(str::to_string)))
            .filter(|name| !desired.contains(name))
            .collect();
        for name in stale {
            tracing::debug!(%name, "deleting stale shadow reference");
            self.cr.find_reference(&name)?.delete()?;
        }

        for (clear, tip) in &refs {
            writeln!(output, "{tip} {clear}")?;
        }
        if refs.iter().any(|(clear, _)| *clear == meta.default_branch) {
            writeln!(output, "@{} HEAD", meta.default_branch)?;
        }
        writeln!(output)?;
        Ok(())
    }

    /// `push`: encrypt the requested tips into the mirror, persist the
    /// extended map, update the encrypted refs, and push everything in one
    /// transport operation.
    fn cmd_push(&mut self, specs: &[String], output: &mut impl Write) -> Result<()> {
        let er = self.mirror.repo();
        let meta = MetaData::read(er, &self.keytool)?;
        let mut map = meta.read_map(er)?;

        // Resolve each spec to a cleartext tip (or a deletion) up front so
        // per-ref failures can be reported without touching the rest.
        let mut resolved: Vec<(PushSpec, std::result::Result<Option<Oid>, String>)> = Vec::new();
        for raw in specs {
            let Some(spec) = parse_push_spec(raw) else {
                resolved.push((
                    PushSpec {
                        force: false,
                        src: None,
                        dst: raw.clone(),
                    },
                    Err("malformed refspec".to_string()),
                ));
                continue;
            };
            let outcome = match &spec.src {
                None => Ok(None),
                Some(src) => match self.cr.revparse_single(src) {
                    Err(e) => Err(e.message().to_string()),
                    Ok(object) => match object.kind() {
                        Some(ObjectType::Commit) | Some(ObjectType::Tag) => Ok(Some(object.id())),
                        kind => Err(IncryptError::unexpected_type(object.id(), kind).to_string()),
                    },
                },
            };
            resolved.push((spec, outcome));
        }

        let tips: Vec<Oid> = resolved
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok().copied().flatten())
            .collect();

        let failed = resolved.iter().any(|(_, outcome)| outcome.is_err());
        if failed && self.options.atomic {
            for (spec, outcome) in &resolved {
                let reason = match outcome {
                    Err(reason) => reason.as_str(),
                    Ok(_) => "atomic transaction failed",
                };
                writeln!(output, "error {} {}", spec.dst, reason)?;
            }
            writeln!(output)?;
            return Ok(());
        }

        let mut encryptor = Encryptor::new(&self.cr, er, &meta.key, &meta.template, &mut map)?;
        encryptor.encrypt(&tips)?;

        // Metadata first: a reader must never see a tip whose wrapper is
        // missing from the map.
        let mut refspecs = vec![format!("+{META_REF}:{META_REF}")];
        let mut results: Vec<(String, Option<String>)> = Vec::new();
        for (spec, outcome) in &resolved {
            match outcome {
                Err(reason) => results.push((spec.dst.clone(), Some(reason.clone()))),
                Ok(None) => {
                    let token = refname::encrypt(&meta.key, &spec.dst);
                    if let Ok(mut reference) = er.find_reference(&token) {
                        reference.delete()?;
                    }
                    refspecs.push(format!(":{token}"));
                    results.push((spec.dst.clone(), None));
                }
                Ok(Some(tip)) => {
                    let wrapper = encryptor.wrapper_of(*tip).ok_or_else(|| {
                        IncryptError::CorruptMetadata(format!("no wrapper produced for tip {tip}"))
                    })?;
                    let token = refname::encrypt(&meta.key, &spec.dst);
                    er.reference(&token, wrapper, true, "incrypt: push")?;
                    refspecs.push(format!("+{token}:{token}"));
                    results.push((spec.dst.clone(), None));
                }
            }
        }

        meta.write(er, &map)?;

        match self.mirror.push(&refspecs, self.options.atomic) {
            Ok(()) => {
                for (dst, error) in results {
                    match error {
                        None => writeln!(output, "ok {dst}")?,
                        Some(reason) => writeln!(output, "error {dst} {reason}")?,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport push failed");
                let reason = e.to_string().replace('\n', " ");
                for (dst, _) in results {
                    writeln!(output, "error {dst} {reason}")?;
                }
            }
        }
        writeln!(output)?;
        Ok(())
    }
}

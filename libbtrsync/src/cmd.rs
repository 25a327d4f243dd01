//! Command lines as data, with the quoting and wrapping rules needed to
//! push them through `sudo` and `ssh` unchanged.

/// A program invocation: program name plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub prg: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new<S: Into<String>>(prg: S) -> Self {
        Self {
            prg: prg.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<S, I, A>(prg: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            prg: prg.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Render as a properly shell-escaped command string.
    pub fn shellify(&self) -> String {
        let mut tokens = vec![shell_quote(&self.prg)];
        tokens.extend(self.args.iter().map(|a| shell_quote(a)));
        tokens.join(" ")
    }

    /// Pass `self` to `outer` as individual trailing arguments
    /// (e.g. `sudo btrfs send ...`).
    pub fn wrap(&self, outer: &Cmd) -> Cmd {
        let mut args = outer.args.clone();
        args.push(self.prg.clone());
        args.extend(self.args.iter().cloned());
        Cmd {
            prg: outer.prg.clone(),
            args,
        }
    }

    /// Join `cmds` into a shell pipeline string passed to `outer` as one
    /// final argument (e.g. `ssh host 'btrfs send ... | gzip'`).
    pub fn pipe_arg(outer: &Cmd, cmds: &[Cmd]) -> Cmd {
        let pipeline = cmds.iter().map(Cmd::shellify).collect::<Vec<_>>().join(" | ");
        let mut args = outer.args.clone();
        args.push(pipeline);
        Cmd {
            prg: outer.prg.clone(),
            args,
        }
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shellify())
    }
}

/// POSIX shell quoting: single-quote anything containing characters outside
/// the known-safe set.
pub fn shell_quote(s: &str) -> String {
    fn safe(c: char) -> bool {
        c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c)
    }
    if !s.is_empty() && s.chars().all(safe) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

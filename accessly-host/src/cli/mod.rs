//! Interactive admin console (`accessly-cmd`)
//!
//! Handles:
//! - Reading and editing `lock_kiosk_status.json` and `details.json`
//! - Checking and killing kiosk processes
//! - Launching a forced update and registering students
//! - Keeping the elevation password in the OS keyring
//!
//! Each input line is one command; errors are printed and the loop goes on.

pub mod prompt;
pub mod values;

use crate::cache::{read_json_object, write_json};
use crate::config::KioskConfig;
use crate::elevation::{command_line, run_elevated, Credentials};
use crate::env::{current_user, KioskEnv};
use crate::kiosk::roster::{register, StudentRecord};
use crate::process::ProcessControl;
use anyhow::{bail, Context, Result};
use prompt::Prompter;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use values::{coerce_for_set, type_name};

const COMMANDS: [&str; 9] = [
    "set",
    "get",
    "help",
    "task",
    "info",
    "update",
    "register",
    "credentials",
    "exit",
];

/// Whether the loop keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// The two JSON documents the console can edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonFile {
    Cache,
    Detail,
}

impl JsonFile {
    const NAMES: [&'static str; 2] = ["cache", "detail"];

    fn parse(func: &str) -> Result<Self> {
        match func {
            "cache" => Ok(JsonFile::Cache),
            "detail" => Ok(JsonFile::Detail),
            other => bail!(invalid_option("function", other, Self::NAMES)),
        }
    }

    fn path(self, env: &KioskEnv) -> PathBuf {
        match self {
            JsonFile::Cache => env.cache_file(),
            JsonFile::Detail => env.details_file(),
        }
    }
}

fn invalid_option<I, S>(kind: &str, given: &str, options: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let listed: String = options
        .into_iter()
        .map(|op| format!("\n--> {}", op.as_ref()))
        .collect();
    format!("Unknown {} '{}'. Valid options: {}", kind, given, listed)
}

/// Strings print bare, everything else as JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn command_list() -> String {
    COMMANDS.join("\n>  ")
}

pub struct Console<R, W> {
    env: KioskEnv,
    config: KioskConfig,
    io: Prompter<R, W>,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(env: KioskEnv, config: KioskConfig, input: R, output: W) -> Self {
        Self {
            env,
            config,
            io: Prompter::new(input, output),
        }
    }

    pub fn env(&self) -> &KioskEnv {
        &self.env
    }

    pub fn output(&self) -> &W {
        &self.io.output
    }

    /// Run `initial` first when given, then read commands until `exit` or
    /// end of input.
    pub async fn run(&mut self, initial: Vec<String>) -> Result<()> {
        let mut pending = Some(initial).filter(|words| !words.is_empty());
        loop {
            let words = match pending.take() {
                Some(words) => words,
                None => match self.io.read_line(">> ")? {
                    Some(line) => line.split_whitespace().map(str::to_string).collect(),
                    None => return Ok(()),
                },
            };
            if words.is_empty() {
                continue;
            }

            match self.execute(&words).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => {
                    writeln!(self.io.output, "Exiting...")?;
                    return Ok(());
                }
                Err(e) => writeln!(self.io.output, "[ERROR] {:#}", e)?,
            }
        }
    }

    pub async fn execute(&mut self, words: &[String]) -> Result<Flow> {
        let Some((cmd, args)) = words.split_first() else {
            return Ok(Flow::Continue);
        };

        match cmd.to_lowercase().as_str() {
            "get" => {
                self.get(args, true)?;
            }
            "set" => self.set(args)?,
            "task" => self.task(args).await?,
            "info" => self.info().await?,
            "update" => self.update().await?,
            "register" => self.register(args)?,
            "credentials" => self.credentials(args)?,
            "help" => writeln!(self.io.output, "Valid options: \n>  {}", command_list())?,
            "exit" => return Ok(Flow::Exit),
            other => writeln!(
                self.io.output,
                "Unknown command {}. Valid options: \n>  {}",
                other,
                command_list()
            )?,
        }
        Ok(Flow::Continue)
    }

    /// `get <func> [key|dir]`. Returns the value read when there is one.
    fn get(&mut self, args: &[String], print: bool) -> Result<Option<Value>> {
        let usage = format!("<{}> <dir?/key?>", JsonFile::NAMES.join("/"));
        if args.is_empty() {
            bail!("Argument incomplete, usage: {}", usage);
        }
        if args.len() > 2 {
            bail!("Argument overflow, usage: {}", usage);
        }

        let func = &args[0];
        let file = JsonFile::parse(func)?;
        let path = file.path(&self.env);

        if args.get(1).map(String::as_str) == Some("dir") {
            writeln!(self.io.output, "{}: {}", func, path.display())?;
            return Ok(None);
        }

        let Some(data) = read_json_object(&path) else {
            writeln!(self.io.output, "No data in {}", path.display())?;
            return Ok(None);
        };

        let Some(key) = args.get(1) else {
            let whole = Value::Object(data);
            if print {
                writeln!(self.io.output, "{}: {}", func.to_uppercase(), whole)?;
            }
            return Ok(Some(whole));
        };

        match data.get(key) {
            Some(value) if !value.is_null() => {
                if print {
                    writeln!(self.io.output, "{}: {}", key.to_uppercase(), display_value(value))?;
                }
                Ok(Some(value.clone()))
            }
            _ => {
                writeln!(self.io.output, "{}", invalid_option("key", key, data.keys()))?;
                Ok(None)
            }
        }
    }

    /// `set <func> <key> <value>`
    fn set(&mut self, args: &[String]) -> Result<()> {
        let [func, key, raw] = args else {
            writeln!(self.io.output, "Argument incomplete, usage: <function> <key> <value>")?;
            return Ok(());
        };

        let file = JsonFile::parse(func)?;
        let path = file.path(&self.env);
        let Some(mut data) = read_json_object(&path) else {
            writeln!(self.io.output, "No data in {}", path.display())?;
            return Ok(());
        };
        let Some(existing) = data.get(key.as_str()) else {
            bail!(invalid_option("key", key, data.keys()));
        };

        let value = match coerce_for_set(existing, raw) {
            Ok(value) => value,
            Err(msg) => {
                writeln!(self.io.output, "{} (key '{}')", msg, key)?;
                return Ok(());
            }
        };

        let shown = format!("{} ({})", display_value(&value), type_name(&value));
        data.insert(key.clone(), value);
        write_json(&path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Console set {}.{}", func, key);
        writeln!(self.io.output, "[SUCCESS] {}.{} => {}", func, key, shown)?;
        Ok(())
    }

    /// `task <check|kill> <names...>`, `app` standing for every kiosk binary.
    async fn task(&mut self, args: &[String]) -> Result<()> {
        if args.len() < 2 {
            writeln!(self.io.output, "Argument incomplete, usage: <check/kill> <app/task_names>")?;
            return Ok(());
        }

        let mode = args[0].to_lowercase();
        let mut tasks: Vec<String> = args[1..].iter().filter(|t| *t != "app").cloned().collect();
        if tasks.len() < args.len() - 1 {
            tasks.extend(self.env.all_app_processes(&[]));
        }

        match mode.as_str() {
            "check" => {
                for task in &tasks {
                    match ProcessControl::find_running(task) {
                        Some(p) => {
                            let exe = p.exe.map(|e| e.display().to_string()).unwrap_or_default();
                            writeln!(self.io.output, "[{}] {}: {}", p.pid, task, exe)?;
                        }
                        None => writeln!(self.io.output, "{} is inactive", task)?,
                    }
                }
            }
            "kill" => {
                let killed = ProcessControl::kill_by_names(&tasks, false).await;
                writeln!(self.io.output, "Killed {} process(es)", killed)?;
            }
            _ => writeln!(self.io.output, "Invalid function, usage: <check/kill> <task_names>")?,
        }
        Ok(())
    }

    async fn info(&mut self) -> Result<()> {
        let details = self.get(&["detail".to_string()], false)?;
        if details.is_none() {
            writeln!(self.io.output, "Cannot get info.")?;
        }
        let field = |name: &str| {
            details
                .as_ref()
                .and_then(|d| d.get(name))
                .map(display_value)
                .unwrap_or_else(|| "Unknown".to_string())
        };
        let run_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "Unknown".to_string());

        let out = &mut self.io.output;
        writeln!(out, "\n======= CLI =======")?;
        writeln!(out, "User: {}", current_user())?;
        writeln!(out, "Directory: {}", run_dir)?;
        writeln!(out, "\n======= APP =======")?;
        writeln!(out, "User: {}", self.env.user())?;
        writeln!(out, "Version: {}", field("version"))?;
        writeln!(out, "Updated: {}", field("updated"))?;
        writeln!(out, "Directory: {}", self.env.base_dir().display())?;
        writeln!(out, "Data: {}", self.env.data_dir().display())?;
        writeln!(out, "Cache: {}", self.env.cache_dir().display())?;
        writeln!(out, "Temp: {}", self.env.temp_dir().display())?;
        self.task(&["check".to_string(), "app".to_string()]).await
    }

    /// Arguments for the forced updater run from the three prompts.
    fn update_args(&mut self) -> Result<Vec<String>> {
        let url = self.io.prompt_optional("DOWNLOAD LINK (Optional)")?;
        let path = self.io.prompt_optional("APP PATH (Optional)")?;
        let user = self
            .io
            .prompt_with_default("ACC USER", &self.config.kiosk.default_user)?;

        let base = match path {
            Some(path) => self.env.with_base_dir(&path)?.base_dir().to_path_buf(),
            None => self.env.base_dir().to_path_buf(),
        };

        let mut args = vec![
            "--dir".to_string(),
            base.to_string_lossy().to_string(),
            "--user".to_string(),
            user,
        ];
        if let Some(url) = url {
            args.push("--update".to_string());
            args.push(url);
        }
        args.push("--force".to_string());
        Ok(args)
    }

    async fn update(&mut self) -> Result<()> {
        let args = self.update_args()?;

        let apps = self.env.all_app_processes(&[]);
        ProcessControl::kill_by_names(&apps, true).await;

        let copy = self.env.script_updater_copy();
        ProcessControl::duplicate_file(&self.env.script_updater(), &copy)
            .context("Failed to refresh the updater copy")?;

        let creds = Credentials::from_config(&self.config)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_elevated(&command_line(&copy, &args), &creds, false)
            .await
            .context("Failed to start the updater")?;
        writeln!(self.io.output, "Updater started.")?;
        Ok(())
    }

    /// `register <id> <last> <first> <middle|-> <course>`
    fn register(&mut self, args: &[String]) -> Result<()> {
        let [id, last, first, middle, course] = args else {
            writeln!(
                self.io.output,
                "Argument incomplete, usage: <id> <lastname> <firstname> <middlename|-> <course>"
            )?;
            return Ok(());
        };

        let student = StudentRecord {
            student_id: id.clone(),
            lastname: last.clone(),
            firstname: first.clone(),
            middlename: if middle == "-" { String::new() } else { middle.clone() },
            course: course.clone(),
        };
        register(&self.env.student_csv(), &student)?;
        writeln!(self.io.output, "[SUCCESS] Registered {}", id)?;
        Ok(())
    }

    /// `credentials <set|clear>` for the elevation account's keyring entry.
    fn credentials(&mut self, args: &[String]) -> Result<()> {
        let account = self.config.elevation.account.clone();
        match args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("set") => {
                let Some(password) = self.io.prompt_optional(&format!("PASSWORD ({})", account))? else {
                    writeln!(self.io.output, "No password given, nothing stored")?;
                    return Ok(());
                };
                self.config
                    .save_password(&password)
                    .context("Failed to store password in keyring")?;
                writeln!(self.io.output, "[SUCCESS] Password stored for {}", account)?;
            }
            Some("clear") => {
                self.config
                    .delete_password()
                    .context("Failed to remove password from keyring")?;
                writeln!(self.io.output, "[SUCCESS] Password removed for {}", account)?;
            }
            _ => writeln!(self.io.output, "Argument incomplete, usage: <set/clear>")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessly_devkit::test_utils::Sandbox;
    use serde_json::json;
    use std::io::Cursor;

    fn console(sandbox: &Sandbox, input: &str) -> Console<Cursor<String>, Vec<u8>> {
        let (users, program_data, windir) = sandbox.roots();
        let env = KioskEnv::with_roots("GVC", users, program_data, windir);
        Console::new(env, KioskConfig::default(), Cursor::new(input.to_string()), Vec::new())
    }

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn shown(console: &Console<Cursor<String>, Vec<u8>>) -> String {
        String::from_utf8_lossy(console.output()).to_string()
    }

    #[tokio::test]
    async fn test_get_key_and_dir() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "");
        write_json(
            &console.env().details_file(),
            &json!({"version": "0.4.7", "updated": "2025-01-01"}),
        )
        .unwrap();

        console.execute(&words("get detail version")).await.unwrap();
        console.execute(&words("get detail dir")).await.unwrap();
        console.execute(&words("get detail nope")).await.unwrap();

        let out = shown(&console);
        assert!(out.contains("VERSION: 0.4.7"));
        assert!(out.contains("details.json"));
        assert!(out.contains("Unknown key 'nope'. Valid options: \n--> updated\n--> version"));
    }

    #[tokio::test]
    async fn test_unknown_function_is_an_error() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "");
        let err = console.execute(&words("get config")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown function 'config'. Valid options: \n--> cache\n--> detail"
        );
    }

    #[tokio::test]
    async fn test_set_checks_type_unless_forced() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "");
        let cache = console.env().cache_file();
        write_json(&cache, &json!({"ENABLED": true})).unwrap();

        console.execute(&words("set cache ENABLED maybe")).await.unwrap();
        assert_eq!(read_json_object(&cache).unwrap()["ENABLED"], json!(true));

        console.execute(&words("set cache ENABLED false")).await.unwrap();
        assert_eq!(read_json_object(&cache).unwrap()["ENABLED"], json!(false));

        console.execute(&words("set cache ENABLED str//off")).await.unwrap();
        assert_eq!(read_json_object(&cache).unwrap()["ENABLED"], json!("off"));

        let out = shown(&console);
        assert!(out.contains("Type mismatch: expected bool, got str (key 'ENABLED')"));
        assert!(out.contains("[SUCCESS] cache.ENABLED => false (bool)"));
        assert!(out.contains("[SUCCESS] cache.ENABLED => off (str)"));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "");
        let line = words("register 2021-0001 Santos Ana - BSIT");

        console.execute(&line).await.unwrap();
        assert!(console.execute(&line).await.is_err());

        let csv = std::fs::read_to_string(console.env().student_csv()).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("2021-0001,Santos,Ana,,BSIT"));
    }

    #[tokio::test]
    async fn test_run_loop() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "bogus\ntask check\nget\nexit\nhelp\n");
        console.run(words("help")).await.unwrap();

        let out = shown(&console);
        assert_eq!(out.matches("Valid options: \n>  set").count(), 2);
        assert!(out.contains("Unknown command bogus."));
        assert!(out.contains("Argument incomplete, usage: <check/kill>"));
        assert!(out.contains("[ERROR] Argument incomplete, usage: <cache/detail> <dir?/key?>"));
        assert!(out.ends_with("Exiting...\n"));
    }

    #[tokio::test]
    async fn test_update_prompts() {
        let sandbox = Sandbox::new();
        let mut console = console(&sandbox, "https://example.com/NizamLab-0.5.0.zip\n\n\n");
        let base = console.env().base_dir().to_string_lossy().to_string();

        let args = console.update_args().unwrap();
        assert_eq!(
            args,
            vec![
                "--dir",
                base.as_str(),
                "--user",
                "GVC",
                "--update",
                "https://example.com/NizamLab-0.5.0.zip",
                "--force"
            ]
        );
    }
}

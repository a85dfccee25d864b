//! Typed wrapper over the orchestrator binary.

use crate::config::StackLayout;
use crate::error::Result;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

/// Issues compose commands against the generated composition document.
pub struct Compose<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    layout: &'a StackLayout,
}

impl<'a, R: CommandRunner + ?Sized> Compose<'a, R> {
    /// Bind a runner to a layout.
    pub fn new(runner: &'a R, layout: &'a StackLayout) -> Self {
        Self { runner, layout }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(self.layout.orchestrator_bin())
            .arg("-f")
            .arg(self.layout.compose_file())
            .current_dir(self.layout.root())
    }

    /// `docker-compose -f <file> up -d`.
    pub async fn up(&self) -> Result<CommandOutput> {
        self.runner.run(&self.command().args(["up", "-d"])).await
    }

    /// `docker-compose -f <file> down`.
    pub async fn down(&self) -> Result<CommandOutput> {
        self.runner.run(&self.command().arg("down")).await
    }
}

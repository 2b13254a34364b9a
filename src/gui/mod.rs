//! egui scraper panel.
//!
//! One window per scraper: a row per axis with its label, last read position,
//! "In"/"Out" steps and an absolute target, an Abort button for all axes and
//! the extra readouts underneath. Without a preselected installation the
//! window opens on a chooser.
//!
//! ## Design
//!
//! - **Pending actions:** clicks are collected while the UI is drawn and run
//!   afterwards, so rendering never holds a borrow across a device call.
//! - **Blocking dispatch:** each action runs to completion on the panel's
//!   tokio runtime before the next frame, one command at a time.
//! - **Error list:** every failure of an action (all of them, for abort) is
//!   kept in a list until the operator dismisses it.

use chrono::{DateTime, Local};
use egui::{Color32, RichText};
use tokio::runtime::Runtime;
use tracing::warn;

use crate::config::PanelConfig;
use crate::controller::{MotorMoveController, MoveCommand};
use crate::device::simulated::SimulatedFactory;
use crate::error::PanelError;
use crate::scraper::{Axis, Scraper, StatusSnapshot};

/// Step and target inputs of one axis row.
#[derive(Debug, Clone, Copy)]
struct AxisInputs {
    in_step: f64,
    out_step: f64,
    target: f64,
}

impl Default for AxisInputs {
    fn default() -> Self {
        Self {
            in_step: 0.1,
            out_step: 0.1,
            target: 0.0,
        }
    }
}

/// A failure shown to the operator.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    /// When the failing action ran.
    pub at: DateTime<Local>,
    /// Rendered error.
    pub message: String,
}

struct ScraperView {
    scraper: Scraper,
    inputs: [AxisInputs; 4],
    status: Option<StatusSnapshot>,
}

enum PanelState {
    Choosing { selected: usize },
    Connected(Box<ScraperView>),
}

/// Action to execute after UI rendering
#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingAction {
    Open(usize),
    Execute(Axis, MoveCommand),
    Abort,
    Refresh,
    DismissErrors,
}

/// The panel application.
pub struct ScraperPanelApp {
    config: PanelConfig,
    factory: SimulatedFactory,
    runtime: Runtime,
    state: PanelState,
    errors: Vec<ErrorEntry>,
    title_sent: bool,
}

impl ScraperPanelApp {
    /// Build the panel, opening `preselected` straight away when it names a
    /// configured installation.
    pub fn new(config: PanelConfig, runtime: Runtime, preselected: Option<&str>) -> Self {
        let factory = SimulatedFactory::from_config(&config);
        let mut app = Self {
            config,
            factory,
            runtime,
            state: PanelState::Choosing { selected: 0 },
            errors: Vec::new(),
            title_sent: false,
        };

        if let Some(id) = preselected {
            let id = id.trim();
            let index = app
                .config
                .installations
                .iter()
                .position(|i| i.id.eq_ignore_ascii_case(id));
            match index {
                Some(index) => app.execute(PendingAction::Open(index)),
                None => app.report(PanelError::UnknownScraper {
                    id: id.to_string(),
                    valid: app.config.installation_ids(),
                }),
            }
        }
        app
    }

    /// Id of the open scraper, if any.
    pub fn scraper_id(&self) -> Option<&str> {
        match &self.state {
            PanelState::Connected(view) => Some(view.scraper.id()),
            PanelState::Choosing { .. } => None,
        }
    }

    /// Failures not yet dismissed.
    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    fn report(&mut self, err: PanelError) {
        warn!("{err}");
        self.errors.push(ErrorEntry {
            at: Local::now(),
            message: err.to_string(),
        });
    }

    fn execute(&mut self, action: PendingAction) {
        match action {
            PendingAction::Open(index) => {
                let Some(installation) = self.config.installations.get(index) else {
                    return;
                };
                let controller = MotorMoveController::from_config(&self.config.controller);
                let connected = self.runtime.block_on(Scraper::connect(
                    installation,
                    &self.factory,
                    controller,
                ));
                match connected {
                    Ok(scraper) => {
                        let status = self.runtime.block_on(scraper.status());
                        self.state = PanelState::Connected(Box::new(ScraperView {
                            scraper,
                            inputs: [AxisInputs::default(); 4],
                            status: Some(status),
                        }));
                        self.title_sent = false;
                    }
                    Err(err) => self.report(err),
                }
            }
            PendingAction::Execute(axis, command) => {
                let PanelState::Connected(view) = &mut self.state else {
                    return;
                };
                let result = self.runtime.block_on(view.scraper.execute(axis, command));
                view.status = Some(self.runtime.block_on(view.scraper.status()));
                if let Err(err) = result {
                    self.report(err);
                }
            }
            PendingAction::Abort => {
                let PanelState::Connected(view) = &mut self.state else {
                    return;
                };
                let report = self.runtime.block_on(view.scraper.abort());
                view.status = Some(self.runtime.block_on(view.scraper.status()));
                for err in report.failures {
                    self.report(err);
                }
            }
            PendingAction::Refresh => {
                if let PanelState::Connected(view) = &mut self.state {
                    view.status = Some(self.runtime.block_on(view.scraper.status()));
                }
            }
            PendingAction::DismissErrors => self.errors.clear(),
        }
    }

    fn chooser_ui(&self, ui: &mut egui::Ui, selected: &mut usize) -> Option<PendingAction> {
        ui.heading("Choose scraper");
        ui.separator();

        let ids = self.config.installation_ids();
        let current = ids.get(*selected).cloned().unwrap_or_default();
        egui::ComboBox::from_label("Scrapers")
            .selected_text(current)
            .show_ui(ui, |ui| {
                for (index, id) in ids.iter().enumerate() {
                    ui.selectable_value(selected, index, id);
                }
            });

        ui.add_space(10.0);
        ui.button("Open")
            .clicked()
            .then_some(PendingAction::Open(*selected))
    }

    fn errors_ui(&self, ctx: &egui::Context) -> Option<PendingAction> {
        if self.errors.is_empty() {
            return None;
        }
        let mut action = None;
        egui::Window::new("Errors")
            .collapsible(false)
            .resizable(true)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
                    for entry in &self.errors {
                        ui.colored_label(
                            Color32::RED,
                            format!("[{}] {}", entry.at.format("%H:%M:%S"), entry.message),
                        );
                    }
                });
                if ui.button("Dismiss").clicked() {
                    action = Some(PendingAction::DismissErrors);
                }
            });
        action
    }
}

fn scraper_ui(ui: &mut egui::Ui, view: &mut ScraperView) -> Option<PendingAction> {
    let mut action = None;

    ui.heading(view.scraper.title())
        .on_hover_text(view.scraper.tooltip());
    ui.separator();

    egui::Grid::new("axes")
        .num_columns(8)
        .striped(true)
        .spacing([12.0, 6.0])
        .show(ui, |ui| {
            for header in ["Axis", "Position", "", "In", "", "Out", "", "Absolute"] {
                ui.strong(header);
            }
            ui.end_row();

            for axis in Axis::ALL {
                let inputs = &mut view.inputs[axis.index()];
                ui.label(view.scraper.label(axis))
                    .on_hover_text(view.scraper.handle(axis).name().as_str());

                let position = view
                    .status
                    .as_ref()
                    .and_then(|s| s.axes.get(axis.index()))
                    .map(|a| a.position.clone());
                match position {
                    Some(Ok(value)) => {
                        ui.colored_label(Color32::GREEN, format!("{value:.3} mm"));
                    }
                    Some(Err(reason)) => {
                        ui.colored_label(Color32::RED, "ERROR").on_hover_text(reason);
                    }
                    None => {
                        ui.label("-");
                    }
                }

                ui.add(egui::DragValue::new(&mut inputs.in_step).speed(0.01).range(0.0..=100.0));
                if ui.button("In").clicked() {
                    action = Some(PendingAction::Execute(
                        axis,
                        MoveCommand::RelativeIncrement(-inputs.in_step),
                    ));
                }
                ui.add(egui::DragValue::new(&mut inputs.out_step).speed(0.01).range(0.0..=100.0));
                if ui.button("Out").clicked() {
                    action = Some(PendingAction::Execute(
                        axis,
                        MoveCommand::RelativeIncrement(inputs.out_step),
                    ));
                }
                ui.add(egui::DragValue::new(&mut inputs.target).speed(0.01));
                if ui.button("Go").clicked() {
                    action = Some(PendingAction::Execute(
                        axis,
                        MoveCommand::AbsoluteTarget(inputs.target),
                    ));
                }
                ui.end_row();
            }
        });

    if let Some(status) = &view.status {
        if !status.readouts.is_empty() {
            ui.add_space(10.0);
            ui.group(|ui| {
                for readout in &status.readouts {
                    match &readout.value {
                        Ok(value) => ui.label(format!("{}: {value:.3}", readout.reference)),
                        Err(reason) => ui.colored_label(
                            Color32::RED,
                            format!("{}: {reason}", readout.reference),
                        ),
                    };
                }
            });
        }
    }

    ui.add_space(15.0);
    ui.horizontal(|ui| {
        let abort = ui.button(RichText::new("Abort").color(Color32::RED).size(16.0));
        if abort.clicked() {
            action = Some(PendingAction::Abort);
        }
        if ui.button("Refresh").clicked() {
            action = Some(PendingAction::Refresh);
        }
        if let Some(status) = &view.status {
            ui.label(format!("Updated {}", status.taken_at.format("%H:%M:%S")));
        }
    });

    action
}

impl eframe::App for ScraperPanelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.title_sent {
            if let PanelState::Connected(view) = &self.state {
                ctx.send_viewport_cmd(egui::ViewportCommand::Title(view.scraper.window_title()));
                self.title_sent = true;
            }
        }

        let mut pending = self.errors_ui(ctx);

        let mut state = std::mem::replace(&mut self.state, PanelState::Choosing { selected: 0 });
        egui::CentralPanel::default().show(ctx, |ui| {
            let action = match &mut state {
                PanelState::Choosing { selected } => self.chooser_ui(ui, selected),
                PanelState::Connected(view) => scraper_ui(ui, view),
            };
            pending = pending.or(action);
        });
        self.state = state;

        // Execute pending action after UI is done borrowing self
        if let Some(action) = pending {
            self.execute(action);
        }
    }
}

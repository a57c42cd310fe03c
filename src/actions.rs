use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Absolute cursor position in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

/// Cursor actions a binding can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorAction {
    MoveTo,
    LeftDown,
    LeftUp,
    LeftClick,
    RightClick,
    ScrollUp,
    ScrollDown,
}

impl CursorAction {
    pub const ALL: [CursorAction; 7] = [
        CursorAction::MoveTo,
        CursorAction::LeftDown,
        CursorAction::LeftUp,
        CursorAction::LeftClick,
        CursorAction::RightClick,
        CursorAction::ScrollUp,
        CursorAction::ScrollDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoveTo => "MoveTo",
            Self::LeftDown => "LeftDown",
            Self::LeftUp => "LeftUp",
            Self::LeftClick => "LeftClick",
            Self::RightClick => "RightClick",
            Self::ScrollUp => "ScrollUp",
            Self::ScrollDown => "ScrollDown",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

/// OS pointer as seen by the flow.
pub trait CursorDriver: Send {
    fn position(&self) -> Position;
    fn move_to(&mut self, to: Position) -> Result<Position>;
    fn press(&mut self, button: Button, down: bool) -> Result<()>;
    /// Positive steps scroll up.
    fn scroll(&mut self, steps: i32) -> Result<()>;

    fn move_by(&mut self, dx: i32, dy: i32) -> Result<Position> {
        let to = self.position().offset(dx, dy);
        self.move_to(to)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionEvent {
    pub action: CursorAction,
    pub position: Position,
    pub timestamp_ms: u64,
}

/// Fan-out of executed actions to any number of listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<ActionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ActionEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Listeners that hung up are dropped here.
    pub fn publish(&self, event: &ActionEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<ActionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Registry executing named cursor actions on a driver.
pub struct CursorHandles {
    driver: Box<dyn CursorDriver>,
    bus: EventBus,
    scroll_steps: i32,
    left_down: bool,
}

impl CursorHandles {
    pub fn new(driver: Box<dyn CursorDriver>, bus: EventBus, scroll_steps: i32) -> Self {
        Self {
            driver,
            bus,
            scroll_steps,
            left_down: false,
        }
    }

    pub fn position(&self) -> Position {
        self.driver.position()
    }

    /// Relative pointer motion; not an action, so nothing is published.
    pub fn move_by(&mut self, dx: i32, dy: i32) -> Result<Position> {
        if dx == 0 && dy == 0 {
            return Ok(self.driver.position());
        }
        self.driver.move_by(dx, dy)
    }

    pub fn is_left_down(&self) -> bool {
        self.left_down
    }

    pub fn execute(&mut self, action: CursorAction, at: Position) -> Result<Position> {
        let performed = match action {
            CursorAction::MoveTo => {
                self.driver.move_to(at)?;
                true
            }
            CursorAction::LeftDown => {
                if self.left_down {
                    false
                } else {
                    self.driver.move_to(at)?;
                    self.driver.press(Button::Left, true)?;
                    self.left_down = true;
                    true
                }
            }
            CursorAction::LeftUp => {
                if self.left_down {
                    self.driver.move_to(at)?;
                    self.driver.press(Button::Left, false)?;
                    self.left_down = false;
                    true
                } else {
                    false
                }
            }
            CursorAction::LeftClick => {
                self.driver.move_to(at)?;
                self.driver.press(Button::Left, true)?;
                self.driver.press(Button::Left, false)?;
                self.left_down = false;
                true
            }
            CursorAction::RightClick => {
                self.driver.move_to(at)?;
                self.driver.press(Button::Right, true)?;
                self.driver.press(Button::Right, false)?;
                true
            }
            CursorAction::ScrollUp => {
                self.driver.scroll(self.scroll_steps)?;
                true
            }
            CursorAction::ScrollDown => {
                self.driver.scroll(-self.scroll_steps)?;
                true
            }
        };

        let position = self.driver.position();
        if performed {
            info!("action {} at ({}, {})", action.as_str(), position.x, position.y);
            self.bus.publish(&ActionEvent {
                action,
                position,
                timestamp_ms: now_ms(),
            });
        }
        Ok(position)
    }

    /// Lifts a latched left button; used on teardown.
    pub fn release(&mut self) {
        if self.is_left_down() {
            let at = self.driver.position();
            if let Err(e) = self.execute(CursorAction::LeftUp, at) {
                warn!("failed to release left button: {e}");
                self.left_down = false;
            }
        }
    }
}

/// Position-only pointer for replays and machines without uinput.
#[derive(Debug, Clone)]
pub struct VirtualCursor {
    pos: Position,
    bounds: (i32, i32),
}

impl VirtualCursor {
    pub fn new(width: u32, height: u32) -> Self {
        let bounds = screen_bounds(width, height);
        Self {
            pos: Position::new(bounds.0 / 2, bounds.1 / 2),
            bounds,
        }
    }
}

/// Screen size as clamp bounds, saturated into `1..=i32::MAX`.
fn screen_bounds(width: u32, height: u32) -> (i32, i32) {
    let side = |v: u32| i32::try_from(v).unwrap_or(i32::MAX).max(1);
    (side(width), side(height))
}

fn clamp_to(p: Position, bounds: (i32, i32)) -> Position {
    Position::new(p.x.clamp(0, bounds.0 - 1), p.y.clamp(0, bounds.1 - 1))
}

impl CursorDriver for VirtualCursor {
    fn position(&self) -> Position {
        self.pos
    }

    fn move_to(&mut self, to: Position) -> Result<Position> {
        self.pos = clamp_to(to, self.bounds);
        Ok(self.pos)
    }

    fn press(&mut self, _button: Button, _down: bool) -> Result<()> {
        Ok(())
    }

    fn scroll(&mut self, _steps: i32) -> Result<()> {
        Ok(())
    }
}

/// Opens the uinput pointer, or a [`VirtualCursor`] when `virtual_only`.
pub fn open_driver(virtual_only: bool, width: u32, height: u32) -> Result<Box<dyn CursorDriver>> {
    if virtual_only {
        info!("cursor: virtual pointer {width}x{height}");
        return Ok(Box::new(VirtualCursor::new(width, height)));
    }
    #[cfg(target_os = "linux")]
    let driver: Result<Box<dyn CursorDriver>> =
        UinputCursor::create(width, height).map(|c| Box::new(c) as Box<dyn CursorDriver>);
    #[cfg(not(target_os = "linux"))]
    let driver: Result<Box<dyn CursorDriver>> = Err(anyhow!(
        "uinput is only available on linux; set cursor.virtual = true"
    ));
    driver
}

/// Virtual uinput pointer. The absolute position is tracked here; the
/// compositor only ever sees relative motion.
#[cfg(target_os = "linux")]
pub struct UinputCursor {
    dev: uinput::device::Device,
    pos: Position,
    bounds: (i32, i32),
}

#[cfg(target_os = "linux")]
impl UinputCursor {
    pub fn create(width: u32, height: u32) -> Result<Self> {
        use uinput::event::{controller::Mouse, relative};

        let dev = uinput::default()
            .map_err(|e| anyhow!("cannot open /dev/uinput: {e}"))?
            .name("handctl virtual pointer")?
            .event(relative::Position::X)?
            .event(relative::Position::Y)?
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .create()?;

        info!("uinput: created virtual pointer");
        let bounds = screen_bounds(width, height);
        Ok(Self {
            dev,
            pos: Position::new(bounds.0 / 2, bounds.1 / 2),
            bounds,
        })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl CursorDriver for UinputCursor {
    fn position(&self) -> Position {
        self.pos
    }

    fn move_to(&mut self, to: Position) -> Result<Position> {
        use uinput::event::relative;

        let target = clamp_to(to, self.bounds);
        let (dx, dy) = (target.x - self.pos.x, target.y - self.pos.y);
        if dx != 0 || dy != 0 {
            self.dev.send(relative::Position::X, dx)?;
            self.dev.send(relative::Position::Y, dy)?;
            self.sync()?;
        }
        self.pos = target;
        Ok(self.pos)
    }

    fn press(&mut self, button: Button, down: bool) -> Result<()> {
        use uinput::event::controller::Mouse;

        let key = match button {
            Button::Left => Mouse::Left,
            Button::Right => Mouse::Right,
        };
        self.dev.send(key, if down { 1 } else { 0 })?;
        self.sync()
    }

    fn scroll(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;

        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

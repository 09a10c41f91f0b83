//! Modifier tracking for the virtual-desktop switch hotkey.
//!
//! Windows switches desktops on Win+Ctrl+Left/Right. The low-level keyboard hook
//! sees raw key transitions, so modifier state has to be tracked here.

use deskpin_core_engine::SwitchDirection;

const VK_CONTROL: u32 = 0x11;
const VK_LEFT: u32 = 0x25;
const VK_RIGHT: u32 = 0x27;
const VK_LWIN: u32 = 0x5B;
const VK_RWIN: u32 = 0x5C;
const VK_LCONTROL: u32 = 0xA2;
const VK_RCONTROL: u32 = 0xA3;

const LWIN: u8 = 1 << 0;
const RWIN: u8 = 1 << 1;
const LCTRL: u8 = 1 << 2;
const RCTRL: u8 = 1 << 3;

/// Turns raw key transitions into switch directions.
///
/// Auto-repeat of a held arrow yields a single direction.
#[derive(Debug, Default, Clone)]
pub struct HotkeyTracker {
    modifiers: u8,
    held_arrow: Option<u32>,
}

impl HotkeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one key transition; returns a direction when the hotkey fires.
    pub fn on_key(&mut self, vk_code: u32, pressed: bool) -> Option<SwitchDirection> {
        let bit = match vk_code {
            VK_LWIN => LWIN,
            VK_RWIN => RWIN,
            VK_LCONTROL | VK_CONTROL => LCTRL,
            VK_RCONTROL => RCTRL,
            _ => 0,
        };
        if bit != 0 {
            if pressed {
                self.modifiers |= bit;
            } else {
                self.modifiers &= !bit;
            }
            return None;
        }

        let direction = match vk_code {
            VK_LEFT => SwitchDirection::Previous,
            VK_RIGHT => SwitchDirection::Next,
            _ => return None,
        };

        if !pressed {
            if self.held_arrow == Some(vk_code) {
                self.held_arrow = None;
            }
            return None;
        }

        if self.held_arrow == Some(vk_code) {
            return None;
        }
        self.held_arrow = Some(vk_code);

        let win = self.modifiers & (LWIN | RWIN) != 0;
        let ctrl = self.modifiers & (LCTRL | RCTRL) != 0;
        (win && ctrl).then_some(direction)
    }
}

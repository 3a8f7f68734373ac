//! Round-machine contract shared by every phase
//!
//! A phase is a sequence of local steps. Step 1 needs nothing from the peer;
//! every later step consumes a fixed set of peer slots. The registry feeds
//! payloads into a [`Mailbox`] and calls [`Protocol::proceed`] while the next
//! step has everything it needs.

use crate::types::{Phase, Role};
use crate::{Error, Result};
use std::fmt;

/// Per-phase inbox whose fields are the wire slots (`wait_0`, ...)
pub trait Mailbox: Default + Send {
    type Slot: Copy + Eq + fmt::Debug + fmt::Display + Send + 'static;

    /// Every slot of this phase
    const ALL: &'static [Self::Slot];

    /// Slots that currently hold a payload
    fn slots(&self) -> Vec<Self::Slot>;

    /// Sender of every payload present
    fn senders(&self) -> Vec<Role>;

    fn holds(&self, slot: Self::Slot) -> bool;

    /// Move all payloads of `other` into `self`.
    ///
    /// Fails without modifying `self` if any slot is already occupied.
    fn absorb(&mut self, other: Self) -> std::result::Result<(), Self::Slot>;

    fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// Outcome of one [`Protocol::proceed`] call
pub enum Transition<M, O> {
    /// The next step is missing peer input
    Blocked,
    /// A step ran; it may or may not have produced a message for the peer
    Sent(Option<M>),
    /// The last step ran
    Finished(O),
}

/// One party's state machine for a phase
pub trait Protocol: Send {
    type Inbox: Mailbox;
    type Output;

    const PHASE: Phase;

    /// Number of message rounds
    const ROUNDS: u8;

    fn role(&self) -> Role;

    /// Steps already executed
    fn rounds_completed(&self) -> u8;

    /// Local step at which a party playing `role` consumes `slot`, or `None`
    /// if that role never receives it.
    fn consumed_in(role: Role, slot: <Self::Inbox as Mailbox>::Slot) -> Option<u8>;

    /// Run the next step, taking its slots out of `inbox`
    fn proceed(
        &mut self,
        inbox: &mut Self::Inbox,
    ) -> Result<Transition<Self::Inbox, Self::Output>>;

    /// Whether every slot needed by the next step is present
    fn ready(&self, inbox: &Self::Inbox) -> bool {
        let next = self.rounds_completed() + 1;
        <Self::Inbox as Mailbox>::ALL
            .iter()
            .filter(|s| Self::consumed_in(self.role(), **s) == Some(next))
            .all(|s| inbox.holds(*s))
    }
}

/// Take a payload that `ready` guaranteed to be present
pub(crate) fn take<T>(slot: &mut Option<crate::types::FromPeer<T>>, name: &str) -> Result<T> {
    slot.take()
        .map(|m| m.payload)
        .ok_or_else(|| Error::Internal(format!("slot {name} missing after readiness check")))
}

/// Declare a phase inbox together with its slot enum and [`Mailbox`] impl.
macro_rules! mailbox {
    (
        $(#[$meta:meta])*
        pub struct $name:ident, slots $slot:ident {
            $( $field:ident : $ty:ty => $variant:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$crate::types::FromPeer<$ty>>,
            )+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $slot {
            $($variant),+
        }

        impl std::fmt::Display for $slot {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( $slot::$variant => f.write_str(stringify!($field)), )+
                }
            }
        }

        impl $crate::protocol::Mailbox for $name {
            type Slot = $slot;

            const ALL: &'static [$slot] = &[$($slot::$variant),+];

            fn slots(&self) -> Vec<$slot> {
                let mut slots = Vec::new();
                $( if self.$field.is_some() { slots.push($slot::$variant); } )+
                slots
            }

            fn senders(&self) -> Vec<$crate::types::Role> {
                let mut senders = Vec::new();
                $( if let Some(m) = &self.$field { senders.push(m.from); } )+
                senders
            }

            fn holds(&self, slot: $slot) -> bool {
                match slot {
                    $( $slot::$variant => self.$field.is_some(), )+
                }
            }

            fn absorb(&mut self, other: Self) -> std::result::Result<(), $slot> {
                $(
                    if other.$field.is_some() && self.$field.is_some() {
                        return Err($slot::$variant);
                    }
                )+
                $(
                    if let Some(m) = other.$field {
                        self.$field = Some(m);
                    }
                )+
                Ok(())
            }
        }
    };
}

pub(crate) use mailbox;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FromPeer;

    mailbox! {
        /// Two-slot inbox for exercising the macro
        pub struct TestInbox, slots TestSlot {
            wait_0: u32 => Wait0,
            wait_1: String => Wait1,
        }
    }

    #[test]
    fn test_absorb_rejects_occupied_slot() {
        let mut inbox = TestInbox::default();
        let first = TestInbox {
            wait_0: Some(FromPeer::new(Role::Client, 1)),
            wait_1: None,
        };
        inbox.absorb(first.clone()).unwrap();
        assert_eq!(inbox.slots(), vec![TestSlot::Wait0]);

        let both = TestInbox {
            wait_0: Some(FromPeer::new(Role::Client, 2)),
            wait_1: Some(FromPeer::new(Role::Client, "x".into())),
        };
        assert_eq!(inbox.absorb(both), Err(TestSlot::Wait0));
        // nothing from the rejected message leaked in
        assert!(!inbox.holds(TestSlot::Wait1));
        assert_eq!(inbox.senders(), vec![Role::Client]);
    }

    #[test]
    fn test_wire_field_names() {
        let inbox = TestInbox {
            wait_0: None,
            wait_1: Some(FromPeer::new(Role::Server, "hi".into())),
        };
        let json = serde_json::to_string(&inbox).unwrap();
        assert_eq!(json, r#"{"wait_1":{"0":"hi"}}"#);
        assert_eq!(TestSlot::Wait1.to_string(), "wait_1");
    }
}

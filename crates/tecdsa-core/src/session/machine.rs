//! Drives one [`Protocol`] from delivered payloads

use crate::protocol::{Mailbox, Protocol, Transition};
use crate::types::Role;
use crate::{Error, Result};
use tracing::debug;

/// What one delivery produced
pub(crate) struct Step<P: Protocol> {
    /// Messages of every step that ran, merged into one
    pub outbound: Option<P::Inbox>,
    pub output: Option<P::Output>,
}

/// A phase party together with its inbox
pub(crate) struct Machine<P: Protocol> {
    party: P,
    inbox: P::Inbox,
}

fn merge<M: Mailbox>(acc: &mut Option<M>, msg: M) -> Result<()> {
    match acc {
        Some(acc) => acc
            .absorb(msg)
            .map_err(|slot| Error::Internal(format!("two steps wrote slot {slot}"))),
        None => {
            *acc = Some(msg);
            Ok(())
        }
    }
}

impl<P: Protocol> Machine<P> {
    /// Wrap a party whose first step already produced `first`
    pub fn open(party: P, first: P::Inbox) -> Result<(Self, Step<P>)> {
        let mut machine = Self {
            party,
            inbox: P::Inbox::default(),
        };
        let mut step = machine.pump()?;
        let mut outbound = Some(first);
        if let Some(later) = step.outbound.take() {
            merge(&mut outbound, later)?;
        }
        step.outbound = outbound.filter(|m| !m.is_empty());
        Ok((machine, step))
    }

    pub fn role(&self) -> Role {
        self.party.role()
    }

    pub fn rounds_completed(&self) -> u8 {
        self.party.rounds_completed()
    }

    /// Accept peer payloads and run every step that became ready.
    ///
    /// Payloads for a later step stay queued; if nothing could run the call
    /// fails with [`Error::RoundOutOfOrder`] while keeping them.
    pub fn deliver(&mut self, msg: P::Inbox, max_queued: usize) -> Result<Step<P>> {
        let role = self.party.role();
        let phase = P::PHASE;
        if msg.is_empty() {
            return Err(Error::UnexpectedMessage(format!("empty {phase} message")));
        }
        if let Some(sender) = msg.senders().into_iter().find(|r| *r != role.peer()) {
            return Err(Error::UnexpectedMessage(format!(
                "{phase} payload from {sender} delivered to {role}"
            )));
        }

        let before = self.party.rounds_completed();
        let mut latest = 0;
        for slot in msg.slots() {
            let round = P::consumed_in(role, slot).ok_or_else(|| {
                Error::UnexpectedMessage(format!("{phase} slot {slot} is never sent to the {role}"))
            })?;
            if round <= before {
                return Err(Error::DuplicateMessage {
                    phase,
                    slot: slot.to_string(),
                });
            }
            latest = latest.max(round);
        }
        self.inbox
            .absorb(msg)
            .map_err(|slot| Error::DuplicateMessage {
                phase,
                slot: slot.to_string(),
            })?;

        let step = self.pump()?;
        if step.output.is_some() {
            return Ok(step);
        }

        let next = self.party.rounds_completed() + 1;
        let queued = self
            .inbox
            .slots()
            .into_iter()
            .filter(|s| P::consumed_in(role, *s).is_some_and(|r| r > next))
            .count();
        if queued > max_queued {
            return Err(Error::QueueOverflow {
                phase,
                limit: max_queued,
            });
        }
        if self.party.rounds_completed() == before && latest > next {
            debug!(%role, %phase, expected = next, received = latest, "Early payload queued");
            return Err(Error::RoundOutOfOrder {
                phase,
                expected: next,
                received: latest,
            });
        }
        Ok(step)
    }

    fn pump(&mut self) -> Result<Step<P>> {
        let mut outbound = None;
        loop {
            match self.party.proceed(&mut self.inbox)? {
                Transition::Blocked => {
                    return Ok(Step {
                        outbound,
                        output: None,
                    })
                }
                Transition::Sent(Some(msg)) => merge(&mut outbound, msg)?,
                Transition::Sent(None) => {}
                Transition::Finished(output) => {
                    return Ok(Step {
                        outbound,
                        output: Some(output),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::{KeygenParty, RcvdKeyshareMessages, KEYGEN_THRESHOLD};

    fn pair() -> (
        (Machine<KeygenParty>, RcvdKeyshareMessages),
        (Machine<KeygenParty>, RcvdKeyshareMessages),
    ) {
        let open = |role| {
            let (party, first) = KeygenParty::new(role, KEYGEN_THRESHOLD).unwrap();
            let (machine, step) = Machine::open(party, first).unwrap();
            (machine, step.outbound.unwrap())
        };
        (open(Role::Server), open(Role::Client))
    }

    #[test]
    fn test_early_payload_is_queued() {
        let ((mut server, s1), (mut client, c1)) = pair();
        let c2 = client.deliver(s1, 4).unwrap().outbound.unwrap();

        let early = server.deliver(c2, 4);
        assert!(matches!(
            early,
            Err(Error::RoundOutOfOrder {
                expected: 2,
                received: 3,
                ..
            })
        ));
        assert_eq!(server.rounds_completed(), 1);

        // the missing payload unblocks both queued steps at once
        let step = server.deliver(c1, 4).unwrap();
        assert_eq!(server.rounds_completed(), 3);
        let merged = step.outbound.unwrap();
        assert!(merged.wait_1.is_some() && merged.wait_2.is_some());
    }

    #[test]
    fn test_rejects_replay_and_own_payloads() {
        let ((mut server, s1), (mut client, c1)) = pair();
        server.deliver(c1.clone(), 4).unwrap();
        assert!(matches!(
            server.deliver(c1, 4),
            Err(Error::DuplicateMessage { .. })
        ));
        assert!(matches!(
            client.deliver(RcvdKeyshareMessages::default(), 4),
            Err(Error::UnexpectedMessage(_))
        ));
        // a party never receives its own payloads
        let (_, own) = KeygenParty::new(Role::Client, KEYGEN_THRESHOLD).unwrap();
        assert!(matches!(
            client.deliver(own, 4),
            Err(Error::UnexpectedMessage(_))
        ));
        assert!(client.deliver(s1, 4).is_ok());
    }

    #[test]
    fn test_queue_limit() {
        let ((mut server, s1), (mut client, _)) = pair();
        let c2 = client.deliver(s1, 4).unwrap().outbound.unwrap();
        // with no room for early payloads a round-3 payload overflows
        assert!(matches!(
            server.deliver(c2, 0),
            Err(Error::QueueOverflow { limit: 0, .. })
        ));
    }
}

//! Built-in cases so the service is usable without a config file.

use crate::domain::{Case, CaseId, Solution};

pub fn seed_cases() -> Vec<Case> {
  vec![
    Case {
      id: CaseId::from("case-001"),
      title: "The Vanishing Vinyl".into(),
      xp_reward: 50,
      solution: Solution {
        answer: "John Doe".into(),
        success_message: "The record store clerk never left the back room. You found your thief.".into(),
        explanation: "Only the clerk's badge was scanned between closing and the alarm; the interview log puts him at the till.".into(),
      },
    },
    Case {
      id: CaseId::from("case-002"),
      title: "Smoke at the Harbor".into(),
      xp_reward: 100,
      solution: Solution {
        answer: "Marla Vance".into(),
        success_message: "The harbor fire was no accident, and now everyone knows who lit it.".into(),
        explanation: "Her boat left the dock twenty minutes before the fire report, and the fuel receipt matches the accelerant.".into(),
      },
    },
  ]
}

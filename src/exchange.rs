use crate::balance::compute_balance_from_group;
use crate::money::round_to_2_decimals;
use crate::schemas::{ExpenseRecord, UserId};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::mem::swap;

#[derive(Clone, Debug)]
struct PersonalBalance {
    id: UserId,
    balance: Decimal,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
struct UserPair {
    user1: UserId,
    user2: UserId,
}

/// A suggested transfer that moves `amount` from `payer` to `receiver`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Exchange {
    pub payer: UserId,
    pub receiver: UserId,
    pub amount: Decimal,
}

// The exchanges that will be made if no simplification happens
fn get_naive_exchanges(expenses: &[ExpenseRecord]) -> Vec<Exchange> {
    let mut balances_between_people: BTreeMap<UserPair, Decimal> = BTreeMap::new();

    for record in expenses {
        let payer = &record.expense.payer;
        for split in record.splits.iter().filter(|split| &split.user_id != payer) {
            let mut pair = UserPair {
                user1: payer.clone(),
                user2: split.user_id.clone(),
            };
            let mut amount = split.owed_amount;

            // Keep every pair in one direction so both sides of a
            // relationship accumulate into the same entry
            if pair.user1 > pair.user2 {
                swap(&mut pair.user1, &mut pair.user2);
                amount = -amount;
            }

            *balances_between_people.entry(pair).or_default() += amount;
        }
    }

    // user1 is owed the balance by user2, so user2 pays unless it is negative
    let mut exchanges = Vec::new();
    for (people_pair, balance) in balances_between_people {
        let amount = round_to_2_decimals(balance.abs());
        if amount.is_zero() {
            continue;
        }
        let mut payer = people_pair.user2;
        let mut receiver = people_pair.user1;
        if balance < Decimal::ZERO {
            swap(&mut payer, &mut receiver);
        }
        exchanges.push(Exchange {
            payer,
            receiver,
            amount,
        });
    }

    exchanges
}

fn sort_by_balance(people: &mut [PersonalBalance]) {
    people.sort_by(|a, b| a.balance.cmp(&b.balance).then_with(|| b.id.cmp(&a.id)));
}

// Greedily matches the biggest debtor with the biggest creditor
fn get_simplified_exchanges(
    mut payers: Vec<PersonalBalance>,
    mut receivers: Vec<PersonalBalance>,
) -> Vec<Exchange> {
    sort_by_balance(&mut payers);
    sort_by_balance(&mut receivers);

    let mut exchanges = Vec::new();

    while let (Some(payer), Some(receiver)) = (payers.last_mut(), receivers.last_mut()) {
        let amount = payer.balance.min(receiver.balance);
        exchanges.push(Exchange {
            payer: payer.id.clone(),
            receiver: receiver.id.clone(),
            amount,
        });
        payer.balance -= amount;
        receiver.balance -= amount;

        let payer_settled = payer.balance.is_zero();
        let receiver_settled = receiver.balance.is_zero();
        if payer_settled {
            payers.pop();
        }
        if receiver_settled {
            receivers.pop();
        }
    }

    exchanges
}

/// Transfers that would settle every balance inside one group.
pub fn get_exchanges_from_group(expenses: &[ExpenseRecord]) -> Vec<Exchange> {
    let people_balances = compute_balance_from_group(expenses);

    // Divide people into payers and receivers
    let mut payers = Vec::new();
    let mut receivers = Vec::new();

    for (id, balance) in people_balances {
        let balance = round_to_2_decimals(balance);
        if balance.is_zero() {
            continue;
        }
        let person = PersonalBalance {
            id,
            balance: balance.abs(),
        };
        if balance < Decimal::ZERO {
            payers.push(person);
        } else {
            receivers.push(person);
        }
    }

    let naive_exchanges = get_naive_exchanges(expenses);
    let simplified_exchanges = get_simplified_exchanges(payers, receivers);

    // The simplification must never produce more transfers than settling
    // each pair on its own
    if simplified_exchanges.len() < naive_exchanges.len() {
        simplified_exchanges
    } else {
        naive_exchanges
    }
}

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::{Frequency, InstallmentRounding};

/// terms a schedule is generated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Money,
    pub interest_rate: Rate,
    pub number_of_installments: u32,
    pub frequency: Frequency,
}

impl LoanTerms {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_installments == 0 {
            return Err(LoanError::InvalidLoanTerms {
                message: "number of installments must be positive".to_string(),
            });
        }

        if !self.principal.is_positive() {
            return Err(LoanError::InvalidLoanTerms {
                message: format!("principal must be positive, got {}", self.principal),
            });
        }

        if self.interest_rate.is_negative() {
            return Err(LoanError::InvalidLoanTerms {
                message: format!("interest rate must not be negative, got {}", self.interest_rate),
            });
        }

        Ok(())
    }

    /// principal plus flat interest
    pub fn total_due(&self) -> Result<Money> {
        self.interest_rate
            .growth_factor()
            .and_then(|factor| self.principal.checked_mul(factor))
            .ok_or_else(|| LoanError::InvalidLoanTerms {
                message: format!(
                    "total of {} at {} exceeds the representable range",
                    self.principal, self.interest_rate
                ),
            })
    }
}

/// one row of a generated schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledInstallment {
    pub sequence: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
}

/// installment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    pub total_due: Money,
    pub installment_amount: Money,
    pub rounding: InstallmentRounding,
    pub installments: Vec<ScheduledInstallment>,
}

impl InstallmentSchedule {
    /// generate the schedule for a loan issued at `issued_at`
    pub fn generate(
        terms: &LoanTerms,
        issued_at: DateTime<Utc>,
        rounding: InstallmentRounding,
    ) -> Result<Self> {
        terms.validate()?;

        let count = terms.number_of_installments;
        let total_due = terms.total_due()?;
        let installment_amount = total_due
            .as_decimal()
            .checked_div(Decimal::from(count))
            .map(|share| {
                Money::from_decimal(share.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
            })
            .ok_or_else(|| LoanError::InvalidLoanTerms {
                message: format!("total {} cannot be split in {} installments", total_due, count),
            })?;

        if !installment_amount.is_positive() {
            return Err(LoanError::InvalidLoanTerms {
                message: format!(
                    "total {} split in {} installments rounds to zero",
                    total_due, count
                ),
            });
        }

        // rounding up each share can push the scheduled sum past the total
        let scheduled_total = installment_amount
            .checked_mul(Decimal::from(count))
            .ok_or_else(|| LoanError::InvalidLoanTerms {
                message: format!("{} installments of {} exceed the representable range", count, installment_amount),
            })?;

        let first_due = first_due_date(issued_at, terms.frequency)?;

        let mut installments = Vec::with_capacity(count as usize);
        for i in 0..count {
            let due_date = advance(first_due, terms.frequency, i).ok_or_else(|| {
                LoanError::InvalidLoanTerms {
                    message: format!("due date of installment {} is out of range", i + 1),
                }
            })?;

            installments.push(ScheduledInstallment {
                sequence: i + 1,
                due_date,
                amount: installment_amount,
            });
        }

        // remainder goes to the last row
        if rounding == InstallmentRounding::AbsorbInFinal && count > 1 {
            let target = total_due.round_cents();
            let others = scheduled_total - installment_amount;
            let last_amount = target - others;

            if !last_amount.is_positive() {
                return Err(LoanError::InvalidLoanTerms {
                    message: format!("final installment would be {}", last_amount),
                });
            }

            if let Some(last) = installments.last_mut() {
                last.amount = last_amount;
            }
        }

        Ok(Self {
            total_due,
            installment_amount,
            rounding,
            installments,
        })
    }

    /// get installment by 1-based sequence
    pub fn get(&self, sequence: u32) -> Option<&ScheduledInstallment> {
        if sequence == 0 {
            return None;
        }
        self.installments.get((sequence - 1) as usize)
    }

    /// sum of the scheduled amounts
    pub fn total_scheduled(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }

    /// scheduled minus owed; non-zero only under uniform rounding
    pub fn rounding_drift(&self) -> Money {
        self.total_scheduled() - self.total_due
    }

    pub fn maturity_date(&self) -> Option<NaiveDate> {
        self.installments.last().map(|i| i.due_date)
    }
}

/// first due date: one period after issue, at midnight
pub fn first_due_date(issued_at: DateTime<Utc>, frequency: Frequency) -> Result<NaiveDate> {
    advance(issued_at.date_naive(), frequency, 1).ok_or_else(|| LoanError::InvalidLoanTerms {
        message: format!("first due date after {} is out of range", issued_at),
    })
}

/// move `date` forward by `periods` steps of `frequency`
///
/// month steps clamp to the end of shorter months (jan 31 -> feb 29 in 2024)
/// instead of rolling the surplus days into the following month (mar 2).
/// a due date therefore never skips a calendar month.
pub fn advance(date: NaiveDate, frequency: Frequency, periods: u32) -> Option<NaiveDate> {
    match frequency {
        Frequency::Weekly => date.checked_add_days(Days::new(7 * periods as u64)),
        Frequency::Biweekly => date.checked_add_days(Days::new(14 * periods as u64)),
        Frequency::Monthly => date.checked_add_months(Months::new(periods)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn terms(principal: i64, rate: u32, count: u32, frequency: Frequency) -> LoanTerms {
        LoanTerms {
            principal: Money::from_major(principal),
            interest_rate: Rate::from_percentage(rate),
            number_of_installments: count,
            frequency,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekly_reference_loan() {
        let issued_at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 42, 10).unwrap();
        let schedule = InstallmentSchedule::generate(
            &terms(1_000, 20, 4, Frequency::Weekly),
            issued_at,
            InstallmentRounding::Uniform,
        )
        .unwrap();

        assert_eq!(schedule.total_due, Money::from_major(1_200));
        assert_eq!(schedule.installment_amount, Money::from_major(300));

        let dues: Vec<NaiveDate> = schedule.installments.iter().map(|i| i.due_date).collect();
        assert_eq!(
            dues,
            vec![date(2024, 3, 11), date(2024, 3, 18), date(2024, 3, 25), date(2024, 4, 1)]
        );
        assert!(schedule.installments.iter().all(|i| i.amount == Money::from_major(300)));
        assert_eq!(schedule.rounding_drift(), Money::ZERO);
    }

    #[test]
    fn test_biweekly_steps() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            &terms(500, 0, 3, Frequency::Biweekly),
            issued_at,
            InstallmentRounding::Uniform,
        )
        .unwrap();

        assert_eq!(schedule.get(1).unwrap().due_date, date(2024, 1, 15));
        assert_eq!(schedule.get(2).unwrap().due_date, date(2024, 1, 29));
        assert_eq!(schedule.get(3).unwrap().due_date, date(2024, 2, 12));
        assert!(schedule.get(0).is_none());
        assert!(schedule.get(4).is_none());
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            &terms(1_200, 10, 3, Frequency::Monthly),
            issued_at,
            InstallmentRounding::Uniform,
        )
        .unwrap();

        let dues: Vec<NaiveDate> = schedule.installments.iter().map(|i| i.due_date).collect();
        // each date is derived from the first due date, so clamping does not accumulate
        assert_eq!(dues, vec![date(2024, 2, 29), date(2024, 3, 29), date(2024, 4, 29)]);
        assert_eq!(schedule.maturity_date(), Some(date(2024, 4, 29)));
    }

    #[test]
    fn test_uniform_rounding_keeps_drift() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            &terms(100, 0, 3, Frequency::Weekly),
            issued_at,
            InstallmentRounding::Uniform,
        )
        .unwrap();

        assert_eq!(schedule.installment_amount, Money::from_decimal(dec!(33.33)));
        assert_eq!(schedule.total_scheduled(), Money::from_decimal(dec!(99.99)));
        assert_eq!(schedule.rounding_drift(), Money::from_decimal(dec!(-0.01)));
    }

    #[test]
    fn test_absorb_in_final_matches_total() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let schedule = InstallmentSchedule::generate(
            &terms(100, 0, 3, Frequency::Weekly),
            issued_at,
            InstallmentRounding::AbsorbInFinal,
        )
        .unwrap();

        assert_eq!(schedule.get(1).unwrap().amount, Money::from_decimal(dec!(33.33)));
        assert_eq!(schedule.get(3).unwrap().amount, Money::from_decimal(dec!(33.34)));
        assert_eq!(schedule.total_scheduled(), Money::from_major(100));
    }

    #[test]
    fn test_half_cent_rounds_up() {
        // 10.05 / 2 = 5.025
        let loan_terms = LoanTerms {
            principal: Money::from_decimal(dec!(10.05)),
            interest_rate: Rate::ZERO,
            number_of_installments: 2,
            frequency: Frequency::Weekly,
        };
        let schedule = InstallmentSchedule::generate(
            &loan_terms,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            InstallmentRounding::Uniform,
        )
        .unwrap();
        assert_eq!(schedule.installment_amount, Money::from_decimal(dec!(5.03)));
    }

    #[test]
    fn test_invalid_terms() {
        let issued_at = Utc::now();

        let zero_count = terms(1_000, 10, 0, Frequency::Weekly);
        assert!(matches!(
            InstallmentSchedule::generate(&zero_count, issued_at, InstallmentRounding::Uniform),
            Err(LoanError::InvalidLoanTerms { .. })
        ));

        let zero_principal = terms(0, 10, 4, Frequency::Weekly);
        assert!(matches!(
            InstallmentSchedule::generate(&zero_principal, issued_at, InstallmentRounding::Uniform),
            Err(LoanError::InvalidLoanTerms { .. })
        ));

        let negative_rate = LoanTerms {
            interest_rate: Rate::from_percent(dec!(-1)),
            ..terms(1_000, 0, 4, Frequency::Weekly)
        };
        assert!(matches!(
            InstallmentSchedule::generate(&negative_rate, issued_at, InstallmentRounding::Uniform),
            Err(LoanError::InvalidLoanTerms { .. })
        ));

        let dust = LoanTerms {
            principal: Money::CENT,
            ..terms(1, 0, 3, Frequency::Weekly)
        };
        assert!(matches!(
            InstallmentSchedule::generate(&dust, issued_at, InstallmentRounding::Uniform),
            Err(LoanError::InvalidLoanTerms { .. })
        ));
    }

    #[test]
    fn test_oversized_terms_are_rejected() {
        let issued_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let huge = Money::from_decimal(Decimal::MAX);

        let with_interest = LoanTerms {
            principal: huge,
            ..terms(1, 20, 4, Frequency::Weekly)
        };
        assert!(matches!(
            InstallmentSchedule::generate(&with_interest, issued_at, InstallmentRounding::Uniform),
            Err(LoanError::InvalidLoanTerms { .. })
        ));

        // fits exactly without interest
        let flat = LoanTerms {
            principal: huge,
            ..terms(1, 0, 1, Frequency::Monthly)
        };
        let schedule = InstallmentSchedule::generate(&flat, issued_at, InstallmentRounding::AbsorbInFinal).unwrap();
        assert_eq!(schedule.total_scheduled(), huge);
    }

    fn frequency_strategy() -> impl Strategy<Value = Frequency> {
        prop_oneof![
            Just(Frequency::Weekly),
            Just(Frequency::Biweekly),
            Just(Frequency::Monthly),
        ]
    }

    proptest! {
        #[test]
        fn prop_schedule_shape(
            principal_cents in 10_000i64..100_000_000,
            rate_bps in 0u32..10_000,
            count in 1u32..=60,
            frequency in frequency_strategy(),
            day_offset in 0i64..3_650,
        ) {
            let loan_terms = LoanTerms {
                principal: Money::from_minor(principal_cents),
                interest_rate: Rate::from_percent(Decimal::new(rate_bps as i64, 2)),
                number_of_installments: count,
                frequency,
            };
            let issued_at = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap()
                + chrono::Duration::days(day_offset);

            let schedule = InstallmentSchedule::generate(&loan_terms, issued_at, InstallmentRounding::Uniform)
                .unwrap();

            // drift bound
            let bound = Money::from_minor(count as i64);
            prop_assert!(schedule.rounding_drift().abs() <= bound);

            // contiguous sequences, strictly increasing dates
            prop_assert_eq!(schedule.installments.len(), count as usize);
            for (idx, row) in schedule.installments.iter().enumerate() {
                prop_assert_eq!(row.sequence, idx as u32 + 1);
            }
            for pair in schedule.installments.windows(2) {
                prop_assert!(pair[0].due_date < pair[1].due_date);
            }
            prop_assert!(schedule.installments[0].due_date > issued_at.date_naive());
        }

        #[test]
        fn prop_absorb_in_final_is_exact(
            principal_cents in 10_000i64..100_000_000,
            rate_bps in 0u32..10_000,
            count in 1u32..=60,
        ) {
            let loan_terms = LoanTerms {
                principal: Money::from_minor(principal_cents),
                interest_rate: Rate::from_percent(Decimal::new(rate_bps as i64, 2)),
                number_of_installments: count,
                frequency: Frequency::Weekly,
            };
            let schedule = InstallmentSchedule::generate(
                &loan_terms,
                Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
                InstallmentRounding::AbsorbInFinal,
            )
            .unwrap();

            prop_assert_eq!(schedule.total_scheduled(), schedule.total_due.round_cents());
        }
    }
}
